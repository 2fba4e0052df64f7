//! API routes for lexisd
//!
//! Identity comes from the trusted `x-user-id` header set by the fronting
//! auth proxy. Catalogue reads work anonymously; progress needs a user.

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use lexis_common::{
    Answer, AnswerOutcome, BlockUpdate, BlockWithQuestions, Discipline, DisciplineProgress,
    DisciplineUpdate, DisciplineView, Lesson, LessonCompletion, LessonUpdate, LexisError, Module,
    ModuleProgress, ModuleUpdate, NewBlock, NewDiscipline, NewLesson, NewModule, NewOption,
    NewQuestion, NewUser, OptionUpdate, Question, QuestionOption, QuestionType, QuestionUpdate,
    User, UserStats,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type AppStateArc = Arc<AppState>;
type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Map a core error to its status and user-facing message
pub fn to_http(err: LexisError) -> (StatusCode, String) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string())
}

fn optional_user(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Body of every delete response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: usize,
}

fn require_user(headers: &HeaderMap) -> Result<i64, (StatusCode, String)> {
    optional_user(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Authentication required".to_string(),
        )
    })
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cached_entries: usize,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cached_entries: state.services.cache.len(),
    })
}

// ============================================================================
// User Routes
// ============================================================================

pub fn user_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/users", post(create_user))
        .route("/v1/users/me", get(me))
        .route("/v1/users/me/stats", get(my_stats))
}

async fn create_user(
    State(state): State<AppStateArc>,
    Json(req): Json<NewUser>,
) -> ApiResult<User> {
    let user = state.services.content.create_user(req).await.map_err(to_http)?;
    Ok(Json(user))
}

async fn me(State(state): State<AppStateArc>, headers: HeaderMap) -> ApiResult<User> {
    let user_id = require_user(&headers)?;
    let user = state.services.content.get_user(user_id).await.map_err(to_http)?;
    Ok(Json(user))
}

async fn my_stats(State(state): State<AppStateArc>, headers: HeaderMap) -> ApiResult<UserStats> {
    let user_id = require_user(&headers)?;
    let stats = state.services.stats.user_stats(user_id).await.map_err(to_http)?;
    Ok(Json(stats))
}

// ============================================================================
// Discipline Routes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub fn discipline_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/disciplines", get(list_disciplines).post(create_discipline))
        .route(
            "/v1/disciplines/:id",
            get(get_discipline)
                .put(update_discipline)
                .delete(delete_discipline),
        )
        .route("/v1/disciplines/:id/modules", get(list_modules))
        .route("/v1/disciplines/:id/progress", get(discipline_progress))
}

async fn list_disciplines(
    State(state): State<AppStateArc>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Vec<DisciplineView>> {
    let views = state
        .services
        .catalog
        .list_discipline_views(query.skip, query.limit, optional_user(&headers))
        .await
        .map_err(to_http)?;
    Ok(Json(views))
}

async fn create_discipline(
    State(state): State<AppStateArc>,
    Json(req): Json<NewDiscipline>,
) -> ApiResult<Discipline> {
    let discipline = state
        .services
        .content
        .create_discipline(req)
        .await
        .map_err(to_http)?;
    Ok(Json(discipline))
}

async fn get_discipline(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<DisciplineView> {
    let view = state
        .services
        .catalog
        .discipline_view(id, optional_user(&headers))
        .await
        .map_err(to_http)?;
    Ok(Json(view))
}

async fn update_discipline(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<DisciplineUpdate>,
) -> ApiResult<Discipline> {
    let discipline = state
        .services
        .content
        .update_discipline(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(discipline))
}

async fn delete_discipline(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state
        .services
        .content
        .delete_discipline(id)
        .await
        .map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}

async fn list_modules(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Module>> {
    let modules = state.services.content.list_modules(id).await.map_err(to_http)?;
    Ok(Json(modules))
}

async fn discipline_progress(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<DisciplineProgress> {
    let user_id = require_user(&headers)?;
    state
        .services
        .content
        .get_discipline(id)
        .await
        .map_err(to_http)?;
    Ok(Json(
        state.services.progress.discipline_progress(user_id, id).await,
    ))
}

// ============================================================================
// Module Routes
// ============================================================================

pub fn module_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/modules", post(create_module))
        .route(
            "/v1/modules/:id",
            get(get_module).put(update_module).delete(delete_module),
        )
        .route("/v1/modules/:id/lessons", get(list_lessons))
        .route("/v1/modules/:id/progress", get(module_progress))
}

async fn create_module(
    State(state): State<AppStateArc>,
    Json(req): Json<NewModule>,
) -> ApiResult<Module> {
    let module = state.services.content.create_module(req).await.map_err(to_http)?;
    Ok(Json(module))
}

async fn get_module(State(state): State<AppStateArc>, Path(id): Path<i64>) -> ApiResult<Module> {
    let module = state.services.content.get_module(id).await.map_err(to_http)?;
    Ok(Json(module))
}

async fn update_module(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<ModuleUpdate>,
) -> ApiResult<Module> {
    let module = state
        .services
        .content
        .update_module(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(module))
}

async fn delete_module(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state.services.content.delete_module(id).await.map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}

async fn list_lessons(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Lesson>> {
    let lessons = state.services.content.list_lessons(id).await.map_err(to_http)?;
    Ok(Json(lessons))
}

async fn module_progress(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<ModuleProgress> {
    let user_id = require_user(&headers)?;
    state.services.content.get_module(id).await.map_err(to_http)?;
    Ok(Json(state.services.progress.module_progress(user_id, id).await))
}

// ============================================================================
// Lesson Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonCompletedResponse {
    pub lesson_id: i64,
    pub completed: bool,
}

pub fn lesson_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/lessons", post(create_lesson))
        .route(
            "/v1/lessons/:id",
            get(get_lesson).put(update_lesson).delete(delete_lesson),
        )
        .route("/v1/lessons/:id/completed", get(lesson_completed))
        .route("/v1/lessons/:id/complete", post(complete_lesson))
        .route("/v1/lessons/:id/blocks", get(list_blocks).post(create_block))
}

async fn create_lesson(
    State(state): State<AppStateArc>,
    Json(req): Json<NewLesson>,
) -> ApiResult<Lesson> {
    let lesson = state.services.content.create_lesson(req).await.map_err(to_http)?;
    Ok(Json(lesson))
}

async fn get_lesson(State(state): State<AppStateArc>, Path(id): Path<i64>) -> ApiResult<Lesson> {
    let lesson = state.services.content.get_lesson(id).await.map_err(to_http)?;
    Ok(Json(lesson))
}

async fn update_lesson(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<LessonUpdate>,
) -> ApiResult<Lesson> {
    let lesson = state
        .services
        .content
        .update_lesson(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(lesson))
}

async fn delete_lesson(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state.services.content.delete_lesson(id).await.map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}

async fn lesson_completed(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<LessonCompletedResponse> {
    let user_id = require_user(&headers)?;
    let completed = state
        .services
        .progress
        .lesson_completed(user_id, id)
        .await
        .map_err(to_http)?;
    Ok(Json(LessonCompletedResponse {
        lesson_id: id,
        completed,
    }))
}

async fn complete_lesson(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<LessonCompletion> {
    let user_id = require_user(&headers)?;
    let completion = state
        .services
        .xp
        .complete_lesson(user_id, id)
        .await
        .map_err(to_http)?;
    Ok(Json(completion))
}

async fn create_block(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<NewBlock>,
) -> ApiResult<BlockWithQuestions> {
    let block = state
        .services
        .content
        .create_block(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(block))
}

async fn list_blocks(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<BlockWithQuestions>> {
    let blocks = state.services.content.list_blocks(id).await.map_err(to_http)?;
    Ok(Json(blocks))
}

// ============================================================================
// Block Routes
// ============================================================================

pub fn block_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/blocks/:id", put(update_block).delete(delete_block))
        .route(
            "/v1/blocks/:id/questions",
            get(list_questions).post(create_question),
        )
        .route("/v1/blocks/:id/questions/batch", post(create_questions_batch))
}

async fn update_block(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<BlockUpdate>,
) -> ApiResult<BlockWithQuestions> {
    let block = state
        .services
        .content
        .update_lesson_block(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(block))
}

async fn delete_block(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state
        .services
        .content
        .delete_lesson_block(id)
        .await
        .map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}

async fn list_questions(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<QuestionResponse>> {
    let questions = state.services.content.list_questions(id).await.map_err(to_http)?;
    Ok(Json(questions.into_iter().map(Into::into).collect()))
}

async fn create_question(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<NewQuestion>,
) -> ApiResult<Question> {
    let question = state
        .services
        .content
        .create_question(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(question))
}

async fn create_questions_batch(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<Vec<NewQuestion>>,
) -> ApiResult<Vec<Question>> {
    let questions = state
        .services
        .content
        .create_questions_batch(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(questions))
}

// ============================================================================
// Question Routes
// ============================================================================

/// Question as shown to a learner: no correctness flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub id: i64,
    pub lesson_block_id: i64,
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<OptionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionResponse {
    pub id: i64,
    pub text: String,
}

impl From<Question> for QuestionResponse {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            lesson_block_id: q.lesson_block_id,
            text: q.text,
            question_type: q.question_type,
            options: q
                .options
                .into_iter()
                .map(|o| OptionResponse {
                    id: o.id,
                    text: o.text,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: serde_json::Value,
}

/// One entry of a batch question update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBatchItem {
    pub id: i64,
    #[serde(flatten)]
    pub changes: QuestionUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionIds {
    pub ids: Vec<i64>,
}

pub fn question_routes() -> Router<AppStateArc> {
    Router::new()
        .route(
            "/v1/questions",
            put(update_questions_batch).delete(delete_questions_batch),
        )
        .route(
            "/v1/questions/:id",
            get(get_question)
                .put(update_question)
                .delete(delete_question),
        )
        .route("/v1/questions/:id/answer", post(submit_answer))
        .route("/v1/questions/:id/options", post(create_option))
}

async fn get_question(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<QuestionResponse> {
    let question = state.services.content.get_question(id).await.map_err(to_http)?;
    Ok(Json(question.into()))
}

async fn update_question(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<QuestionUpdate>,
) -> ApiResult<Question> {
    let question = state
        .services
        .content
        .update_question(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(question))
}

async fn delete_question(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state.services.content.delete_question(id).await.map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}

async fn update_questions_batch(
    State(state): State<AppStateArc>,
    Json(req): Json<Vec<QuestionBatchItem>>,
) -> ApiResult<Vec<Question>> {
    let batch = req.into_iter().map(|item| (item.id, item.changes)).collect();
    let questions = state
        .services
        .content
        .update_questions_batch(batch)
        .await
        .map_err(to_http)?;
    Ok(Json(questions))
}

async fn delete_questions_batch(
    State(state): State<AppStateArc>,
    Json(req): Json<QuestionIds>,
) -> ApiResult<DeletedResponse> {
    let deleted = state
        .services
        .content
        .delete_questions_batch(req.ids)
        .await
        .map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn create_option(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<NewOption>,
) -> ApiResult<QuestionOption> {
    let option = state
        .services
        .content
        .create_question_option(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(option))
}

async fn submit_answer(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<AnswerOutcome> {
    let user_id = require_user(&headers)?;
    let answer = Answer::from_json(&req.answer).map_err(to_http)?;
    let outcome = state
        .services
        .xp
        .submit_answer(user_id, id, answer)
        .await
        .map_err(to_http)?;
    Ok(Json(outcome))
}

// ============================================================================
// Option Routes
// ============================================================================

pub fn option_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/options/:id", put(update_option).delete(delete_option))
}

async fn update_option(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<OptionUpdate>,
) -> ApiResult<QuestionOption> {
    let option = state
        .services
        .content
        .update_question_option(id, req)
        .await
        .map_err(to_http)?;
    Ok(Json(option))
}

async fn delete_option(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
) -> ApiResult<DeletedResponse> {
    state
        .services
        .content
        .delete_question_option(id)
        .await
        .map_err(to_http)?;
    Ok(Json(DeletedResponse { deleted: 1 }))
}
