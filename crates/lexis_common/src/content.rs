//! Content repository: users and the Discipline -> ... -> Option hierarchy.
//!
//! Reads go straight to the connection; every write runs in one immediate
//! transaction so a failure leaves nothing half-written. Writes that change
//! what a lesson, module or discipline contains publish
//! [`ProgressEvent::CatalogChanged`] after commit.

use crate::db::LearningDb;
use crate::error::{LexisError, Result};
use crate::events::{EventBus, ProgressEvent};
use crate::models::{
    BlockType, Discipline, Lesson, LessonBlock, Module, Question, QuestionOption, QuestionType,
    User,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDiscipline {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModule {
    pub discipline_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLesson {
    pub module_id: i64,
    pub title: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub correct_answer_text: Option<String>,
    #[serde(default)]
    pub general_explanation: Option<String>,
    #[serde(default)]
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlock {
    #[serde(default)]
    pub order_in_lesson: i64,
    pub block_type: BlockType,
    #[serde(default)]
    pub theory_text: Option<String>,
    #[serde(default)]
    pub questions: Vec<NewQuestion>,
}

/// Partial discipline update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisciplineUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Partial module update; `discipline_id` moves the module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleUpdate {
    pub discipline_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub order: Option<i64>,
}

/// Partial lesson update; `module_id` moves the lesson
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonUpdate {
    pub module_id: Option<i64>,
    pub title: Option<String>,
    pub order: Option<i64>,
}

/// Option entry inside a question update. Without an `id` it is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionEdit {
    pub id: Option<i64>,
    pub text: Option<String>,
    pub is_correct: Option<bool>,
}

/// Partial update of a single option; `question_id` re-parents it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionUpdate {
    pub question_id: Option<i64>,
    pub text: Option<String>,
    pub is_correct: Option<bool>,
}

/// Partial question update.
///
/// When `options` is present it becomes the full option set: listed ids are
/// edited, entries without an id are created and the rest are deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionUpdate {
    pub text: Option<String>,
    pub question_type: Option<QuestionType>,
    pub correct_answer_text: Option<String>,
    pub general_explanation: Option<String>,
    pub options: Option<Vec<OptionEdit>>,
}

impl QuestionUpdate {
    fn into_new(self) -> Result<NewQuestion> {
        let (text, question_type) = match (self.text, self.question_type) {
            (Some(text), Some(question_type)) => (text, question_type),
            _ => {
                return Err(LexisError::InvalidInput(
                    "a new question needs text and question_type".to_string(),
                ))
            }
        };
        let options = self
            .options
            .unwrap_or_default()
            .into_iter()
            .map(|edit| {
                Ok(NewOption {
                    text: require_option_text(edit.text.as_deref())?,
                    is_correct: edit.is_correct.unwrap_or(false),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(NewQuestion {
            text,
            question_type,
            correct_answer_text: self.correct_answer_text,
            general_explanation: self.general_explanation,
            options,
        })
    }
}

/// Question entry inside a block update. Without an `id` it is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionEdit {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub changes: QuestionUpdate,
}

/// Partial block update.
///
/// When `questions` is present it becomes the full question set of the
/// block, with the same rules as [`QuestionUpdate::options`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockUpdate {
    pub order_in_lesson: Option<i64>,
    pub theory_text: Option<String>,
    pub questions: Option<Vec<QuestionEdit>>,
}

/// A lesson block with its questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockWithQuestions {
    pub block: LessonBlock,
    pub questions: Vec<Question>,
}

fn require_title(title: &str, entity: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(LexisError::InvalidInput(format!(
            "{} title must not be empty",
            entity
        )));
    }
    Ok(title.to_string())
}

fn require_option_text(text: Option<&str>) -> Result<String> {
    match text.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(LexisError::InvalidInput(
            "option text must not be empty".to_string(),
        )),
    }
}

fn log_failure(op: &str, err: LexisError) -> LexisError {
    if let LexisError::Persistence(_) = err {
        error!("{} failed: {}", op, err);
    }
    err
}

pub struct ContentRepository {
    db: Arc<LearningDb>,
    bus: Arc<EventBus>,
}

impl ContentRepository {
    pub fn new(db: Arc<LearningDb>, bus: Arc<EventBus>) -> Self {
        Self { db, bus }
    }

    fn catalog_changed(&self) {
        self.bus.publish(ProgressEvent::CatalogChanged);
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        let email = new.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(LexisError::InvalidInput(format!(
                "'{}' is not a valid email address",
                new.email
            )));
        }

        let user = self
            .db
            .transaction(move |tx| {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                    params![email],
                    |row| row.get(0),
                )?;
                if exists {
                    return Err(LexisError::duplicate("User", "email", email));
                }

                tx.execute(
                    "INSERT INTO users (email, full_name, is_active, xp_points, created_at)
                     VALUES (?1, ?2, 1, 0, ?3)",
                    params![email, new.full_name, Utc::now()],
                )?;
                fetch_user(tx, tx.last_insert_rowid())?
                    .ok_or_else(|| LexisError::Persistence("created user vanished".to_string()))
            })
            .await
            .map_err(|e| log_failure("create user", e))?;

        info!(user_id = user.id, "Created user");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        self.db
            .execute(move |conn| {
                fetch_user(conn, user_id)?.ok_or_else(|| LexisError::not_found("User", user_id))
            })
            .await
    }

    // ------------------------------------------------------------------
    // Disciplines
    // ------------------------------------------------------------------

    pub async fn create_discipline(&self, new: NewDiscipline) -> Result<Discipline> {
        let title = require_title(&new.title, "Discipline")?;

        let discipline = self
            .db
            .transaction(move |tx| {
                if discipline_title_taken(tx, &title, None)? {
                    return Err(LexisError::duplicate("Discipline", "title", title));
                }

                tx.execute(
                    "INSERT INTO disciplines (title, description, created_at) VALUES (?1, ?2, ?3)",
                    params![title, new.description, Utc::now()],
                )?;
                fetch_discipline(tx, tx.last_insert_rowid())?.ok_or_else(|| {
                    LexisError::Persistence("created discipline vanished".to_string())
                })
            })
            .await
            .map_err(|e| log_failure("create discipline", e))?;

        self.catalog_changed();
        Ok(discipline)
    }

    pub async fn get_discipline(&self, discipline_id: i64) -> Result<Discipline> {
        self.db
            .execute(move |conn| {
                fetch_discipline(conn, discipline_id)?
                    .ok_or_else(|| LexisError::not_found("Discipline", discipline_id))
            })
            .await
    }

    pub async fn list_disciplines(&self, skip: u32, limit: u32) -> Result<Vec<Discipline>> {
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {} FROM disciplines ORDER BY id LIMIT ?1 OFFSET ?2",
                    Discipline::COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit, skip], Discipline::from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    pub async fn update_discipline(
        &self,
        discipline_id: i64,
        changes: DisciplineUpdate,
    ) -> Result<Discipline> {
        let title = changes
            .title
            .as_deref()
            .map(|t| require_title(t, "Discipline"))
            .transpose()?;

        self.db
            .transaction(move |tx| {
                if fetch_discipline(tx, discipline_id)?.is_none() {
                    return Err(LexisError::not_found("Discipline", discipline_id));
                }
                if let Some(title) = &title {
                    if discipline_title_taken(tx, title, Some(discipline_id))? {
                        return Err(LexisError::duplicate("Discipline", "title", title.as_str()));
                    }
                }

                tx.execute(
                    "UPDATE disciplines
                     SET title = COALESCE(?1, title), description = COALESCE(?2, description)
                     WHERE id = ?3",
                    params![title, changes.description, discipline_id],
                )?;
                fetch_discipline(tx, discipline_id)?.ok_or_else(|| {
                    LexisError::Persistence("updated discipline vanished".to_string())
                })
            })
            .await
            .map_err(|e| log_failure("update discipline", e))
    }

    pub async fn delete_discipline(&self, discipline_id: i64) -> Result<()> {
        self.delete_row("disciplines", "Discipline", discipline_id)
            .await?;
        self.catalog_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    pub async fn create_module(&self, new: NewModule) -> Result<Module> {
        let title = require_title(&new.title, "Module")?;

        let module = self
            .db
            .transaction(move |tx| {
                if fetch_discipline(tx, new.discipline_id)?.is_none() {
                    return Err(LexisError::not_found("Discipline", new.discipline_id));
                }
                if module_title_taken(tx, new.discipline_id, &title, None)? {
                    return Err(LexisError::duplicate(
                        "Module",
                        "title within the discipline",
                        title,
                    ));
                }

                tx.execute(
                    "INSERT INTO modules (discipline_id, title, description, sort_order)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![new.discipline_id, title, new.description, new.order],
                )?;
                fetch_module(tx, tx.last_insert_rowid())?
                    .ok_or_else(|| LexisError::Persistence("created module vanished".to_string()))
            })
            .await
            .map_err(|e| log_failure("create module", e))?;

        self.catalog_changed();
        Ok(module)
    }

    pub async fn get_module(&self, module_id: i64) -> Result<Module> {
        self.db
            .execute(move |conn| {
                fetch_module(conn, module_id)?
                    .ok_or_else(|| LexisError::not_found("Module", module_id))
            })
            .await
    }

    pub async fn list_modules(&self, discipline_id: i64) -> Result<Vec<Module>> {
        self.db
            .execute(move |conn| {
                if fetch_discipline(conn, discipline_id)?.is_none() {
                    return Err(LexisError::not_found("Discipline", discipline_id));
                }
                modules_of(conn, discipline_id)
            })
            .await
    }

    pub async fn update_module(&self, module_id: i64, changes: ModuleUpdate) -> Result<Module> {
        let title = changes
            .title
            .as_deref()
            .map(|t| require_title(t, "Module"))
            .transpose()?;

        let (module, moved) = self
            .db
            .transaction(move |tx| {
                let current = fetch_module(tx, module_id)?
                    .ok_or_else(|| LexisError::not_found("Module", module_id))?;
                let discipline_id = changes.discipline_id.unwrap_or(current.discipline_id);
                let moved = discipline_id != current.discipline_id;
                if moved && fetch_discipline(tx, discipline_id)?.is_none() {
                    return Err(LexisError::not_found("Discipline", discipline_id));
                }

                let title = title.unwrap_or(current.title);
                if module_title_taken(tx, discipline_id, &title, Some(module_id))? {
                    return Err(LexisError::duplicate(
                        "Module",
                        "title within the discipline",
                        title,
                    ));
                }

                tx.execute(
                    "UPDATE modules
                     SET discipline_id = ?1, title = ?2,
                         description = COALESCE(?3, description),
                         sort_order = COALESCE(?4, sort_order)
                     WHERE id = ?5",
                    params![discipline_id, title, changes.description, changes.order, module_id],
                )?;
                let module = fetch_module(tx, module_id)?
                    .ok_or_else(|| LexisError::Persistence("updated module vanished".to_string()))?;
                Ok((module, moved))
            })
            .await
            .map_err(|e| log_failure("update module", e))?;

        if moved {
            info!(module_id, discipline_id = module.discipline_id, "Moved module");
            self.catalog_changed();
        }
        Ok(module)
    }

    pub async fn delete_module(&self, module_id: i64) -> Result<()> {
        self.delete_row("modules", "Module", module_id).await?;
        self.catalog_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------

    pub async fn create_lesson(&self, new: NewLesson) -> Result<Lesson> {
        let title = require_title(&new.title, "Lesson")?;

        let lesson = self
            .db
            .transaction(move |tx| {
                if fetch_module(tx, new.module_id)?.is_none() {
                    return Err(LexisError::not_found("Module", new.module_id));
                }
                if lesson_title_taken(tx, new.module_id, &title, None)? {
                    return Err(LexisError::duplicate(
                        "Lesson",
                        "title within the module",
                        title,
                    ));
                }

                tx.execute(
                    "INSERT INTO lessons (module_id, title, sort_order) VALUES (?1, ?2, ?3)",
                    params![new.module_id, title, new.order],
                )?;
                fetch_lesson(tx, tx.last_insert_rowid())?
                    .ok_or_else(|| LexisError::Persistence("created lesson vanished".to_string()))
            })
            .await
            .map_err(|e| log_failure("create lesson", e))?;

        self.catalog_changed();
        Ok(lesson)
    }

    pub async fn get_lesson(&self, lesson_id: i64) -> Result<Lesson> {
        self.db
            .execute(move |conn| {
                fetch_lesson(conn, lesson_id)?
                    .ok_or_else(|| LexisError::not_found("Lesson", lesson_id))
            })
            .await
    }

    pub async fn list_lessons(&self, module_id: i64) -> Result<Vec<Lesson>> {
        self.db
            .execute(move |conn| {
                if fetch_module(conn, module_id)?.is_none() {
                    return Err(LexisError::not_found("Module", module_id));
                }
                lessons_of(conn, module_id)
            })
            .await
    }

    pub async fn update_lesson(&self, lesson_id: i64, changes: LessonUpdate) -> Result<Lesson> {
        let title = changes
            .title
            .as_deref()
            .map(|t| require_title(t, "Lesson"))
            .transpose()?;

        let (lesson, moved) = self
            .db
            .transaction(move |tx| {
                let current = fetch_lesson(tx, lesson_id)?
                    .ok_or_else(|| LexisError::not_found("Lesson", lesson_id))?;
                let module_id = changes.module_id.unwrap_or(current.module_id);
                let moved = module_id != current.module_id;
                if moved && fetch_module(tx, module_id)?.is_none() {
                    return Err(LexisError::not_found("Module", module_id));
                }

                let title = title.unwrap_or(current.title);
                if lesson_title_taken(tx, module_id, &title, Some(lesson_id))? {
                    return Err(LexisError::duplicate(
                        "Lesson",
                        "title within the module",
                        title,
                    ));
                }

                tx.execute(
                    "UPDATE lessons
                     SET module_id = ?1, title = ?2, sort_order = COALESCE(?3, sort_order)
                     WHERE id = ?4",
                    params![module_id, title, changes.order, lesson_id],
                )?;
                let lesson = fetch_lesson(tx, lesson_id)?
                    .ok_or_else(|| LexisError::Persistence("updated lesson vanished".to_string()))?;
                Ok((lesson, moved))
            })
            .await
            .map_err(|e| log_failure("update lesson", e))?;

        if moved {
            info!(lesson_id, module_id = lesson.module_id, "Moved lesson");
            self.catalog_changed();
        }
        Ok(lesson)
    }

    pub async fn delete_lesson(&self, lesson_id: i64) -> Result<()> {
        self.delete_row("lessons", "Lesson", lesson_id).await?;
        self.catalog_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Create a block with its nested questions and options in one transaction
    pub async fn create_block(&self, lesson_id: i64, new: NewBlock) -> Result<BlockWithQuestions> {
        if new.block_type == BlockType::Theory && !new.questions.is_empty() {
            return Err(LexisError::InvalidInput(
                "a theory block cannot carry questions".to_string(),
            ));
        }

        self.db
            .transaction(move |tx| {
                if fetch_lesson(tx, lesson_id)?.is_none() {
                    return Err(LexisError::not_found("Lesson", lesson_id));
                }

                tx.execute(
                    "INSERT INTO lesson_blocks (lesson_id, order_in_lesson, block_type, theory_text)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![lesson_id, new.order_in_lesson, new.block_type, new.theory_text],
                )?;
                let block_id = tx.last_insert_rowid();

                let questions = new
                    .questions
                    .iter()
                    .map(|q| insert_question(tx, block_id, q))
                    .collect::<Result<Vec<_>>>()?;

                let block = fetch_block(tx, block_id)?
                    .ok_or_else(|| LexisError::Persistence("created block vanished".to_string()))?;
                Ok(BlockWithQuestions { block, questions })
            })
            .await
            .map_err(|e| log_failure("create lesson block", e))
    }

    pub async fn list_blocks(&self, lesson_id: i64) -> Result<Vec<BlockWithQuestions>> {
        self.db
            .execute(move |conn| {
                if fetch_lesson(conn, lesson_id)?.is_none() {
                    return Err(LexisError::not_found("Lesson", lesson_id));
                }
                let sql = format!(
                    "SELECT {} FROM lesson_blocks
                     WHERE lesson_id = ?1 ORDER BY order_in_lesson, id",
                    LessonBlock::COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let blocks = stmt
                    .query_map(params![lesson_id], LessonBlock::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                blocks
                    .into_iter()
                    .map(|block| {
                        let questions = questions_of(conn, block.id)?;
                        Ok(BlockWithQuestions { block, questions })
                    })
                    .collect()
            })
            .await
    }

    /// Update block fields and, when given, replace its question set
    pub async fn update_lesson_block(
        &self,
        block_id: i64,
        changes: BlockUpdate,
    ) -> Result<BlockWithQuestions> {
        let (updated, removed) = self
            .db
            .transaction(move |tx| {
                let block = fetch_block(tx, block_id)?
                    .ok_or_else(|| LexisError::not_found("Lesson block", block_id))?;
                let has_questions = changes.questions.as_ref().is_some_and(|q| !q.is_empty());
                if block.block_type == BlockType::Theory && has_questions {
                    return Err(LexisError::InvalidInput(
                        "a theory block cannot carry questions".to_string(),
                    ));
                }

                tx.execute(
                    "UPDATE lesson_blocks
                     SET order_in_lesson = COALESCE(?1, order_in_lesson),
                         theory_text = COALESCE(?2, theory_text)
                     WHERE id = ?3",
                    params![changes.order_in_lesson, changes.theory_text, block_id],
                )?;

                let removed = match changes.questions {
                    Some(edits) => replace_questions(tx, block_id, edits)?,
                    None => 0,
                };

                let block = fetch_block(tx, block_id)?
                    .ok_or_else(|| LexisError::Persistence("updated block vanished".to_string()))?;
                let questions = questions_of(tx, block_id)?;
                Ok((BlockWithQuestions { block, questions }, removed))
            })
            .await
            .map_err(|e| log_failure("update lesson block", e))?;

        if removed > 0 {
            info!(block_id, removed, "Removed questions from block");
            self.catalog_changed();
        }
        Ok(updated)
    }

    pub async fn delete_lesson_block(&self, block_id: i64) -> Result<()> {
        self.delete_row("lesson_blocks", "Lesson block", block_id)
            .await?;
        self.catalog_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    pub async fn create_question(&self, block_id: i64, new: NewQuestion) -> Result<Question> {
        self.db
            .transaction(move |tx| {
                require_exercise_block(tx, block_id)?;
                insert_question(tx, block_id, &new)
            })
            .await
            .map_err(|e| log_failure("create question", e))
    }

    /// Create several questions in one block; all or none are stored
    pub async fn create_questions_batch(
        &self,
        block_id: i64,
        batch: Vec<NewQuestion>,
    ) -> Result<Vec<Question>> {
        let created = self
            .db
            .transaction(move |tx| {
                require_exercise_block(tx, block_id)?;
                batch
                    .iter()
                    .map(|q| insert_question(tx, block_id, q))
                    .collect::<Result<Vec<_>>>()
            })
            .await
            .map_err(|e| log_failure("create questions batch", e))?;

        info!(block_id, created = created.len(), "Created questions");
        Ok(created)
    }

    pub async fn get_question(&self, question_id: i64) -> Result<Question> {
        self.db
            .execute(move |conn| {
                load_question(conn, question_id)?
                    .ok_or_else(|| LexisError::not_found("Question", question_id))
            })
            .await
    }

    pub async fn list_questions(&self, block_id: i64) -> Result<Vec<Question>> {
        self.db
            .execute(move |conn| {
                if fetch_block(conn, block_id)?.is_none() {
                    return Err(LexisError::not_found("Lesson block", block_id));
                }
                questions_of(conn, block_id)
            })
            .await
    }

    pub async fn update_question(
        &self,
        question_id: i64,
        changes: QuestionUpdate,
    ) -> Result<Question> {
        self.db
            .transaction(move |tx| apply_question_update(tx, question_id, &changes))
            .await
            .map_err(|e| log_failure("update question", e))
    }

    /// Update several questions in one transaction. Unknown ids are skipped.
    pub async fn update_questions_batch(
        &self,
        batch: Vec<(i64, QuestionUpdate)>,
    ) -> Result<Vec<Question>> {
        self.db
            .transaction(move |tx| {
                let mut updated = Vec::with_capacity(batch.len());
                for (question_id, changes) in &batch {
                    match apply_question_update(tx, *question_id, changes) {
                        Ok(question) => updated.push(question),
                        Err(LexisError::NotFound { .. }) => {
                            warn!(question_id, "Question not found in batch update, skipping");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(updated)
            })
            .await
            .map_err(|e| log_failure("update questions batch", e))
    }

    pub async fn delete_question(&self, question_id: i64) -> Result<()> {
        self.delete_row("questions", "Question", question_id)
            .await?;
        self.catalog_changed();
        Ok(())
    }

    /// Delete the listed questions; returns how many existed
    pub async fn delete_questions_batch(&self, question_ids: Vec<i64>) -> Result<usize> {
        if question_ids.is_empty() {
            return Ok(0);
        }

        let ids = question_ids.clone();
        let deleted = self
            .db
            .transaction(move |tx| {
                let mut deleted = 0;
                for id in &ids {
                    deleted += tx.execute("DELETE FROM questions WHERE id = ?1", params![id])?;
                }
                Ok(deleted)
            })
            .await
            .map_err(|e| log_failure("delete questions batch", e))?;

        if deleted == 0 {
            let ids: Vec<String> = question_ids.iter().map(i64::to_string).collect();
            return Err(LexisError::not_found("Question", ids.join(", ")));
        }
        info!(deleted, requested = question_ids.len(), "Deleted questions");
        self.catalog_changed();
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Question options
    // ------------------------------------------------------------------

    pub async fn create_question_option(
        &self,
        question_id: i64,
        new: NewOption,
    ) -> Result<QuestionOption> {
        let text = require_option_text(Some(new.text.as_str()))?;

        self.db
            .transaction(move |tx| {
                if !question_exists(tx, question_id)? {
                    return Err(LexisError::not_found("Question", question_id));
                }
                tx.execute(
                    "INSERT INTO question_options (question_id, text, is_correct)
                     VALUES (?1, ?2, ?3)",
                    params![question_id, text, new.is_correct],
                )?;
                fetch_option(tx, tx.last_insert_rowid())?
                    .ok_or_else(|| LexisError::Persistence("created option vanished".to_string()))
            })
            .await
            .map_err(|e| log_failure("create question option", e))
    }

    pub async fn update_question_option(
        &self,
        option_id: i64,
        changes: OptionUpdate,
    ) -> Result<QuestionOption> {
        let text = changes
            .text
            .as_deref()
            .map(|t| require_option_text(Some(t)))
            .transpose()?;

        self.db
            .transaction(move |tx| {
                let current = fetch_option(tx, option_id)?
                    .ok_or_else(|| LexisError::not_found("Question option", option_id))?;
                let question_id = changes.question_id.unwrap_or(current.question_id);
                if question_id != current.question_id && !question_exists(tx, question_id)? {
                    return Err(LexisError::not_found("Question", question_id));
                }

                tx.execute(
                    "UPDATE question_options
                     SET question_id = ?1, text = COALESCE(?2, text),
                         is_correct = COALESCE(?3, is_correct)
                     WHERE id = ?4",
                    params![question_id, text, changes.is_correct, option_id],
                )?;
                fetch_option(tx, option_id)?
                    .ok_or_else(|| LexisError::Persistence("updated option vanished".to_string()))
            })
            .await
            .map_err(|e| log_failure("update question option", e))
    }

    pub async fn delete_question_option(&self, option_id: i64) -> Result<()> {
        self.delete_row("question_options", "Question option", option_id)
            .await
    }

    async fn delete_row(&self, table: &'static str, entity: &'static str, id: i64) -> Result<()> {
        let deleted = self
            .db
            .transaction(move |tx| {
                let sql = format!("DELETE FROM {} WHERE id = ?1", table);
                Ok(tx.execute(&sql, params![id])?)
            })
            .await
            .map_err(|e| log_failure("delete", e))?;

        if deleted == 0 {
            return Err(LexisError::not_found(entity, id));
        }
        info!(entity, id, "Deleted content");
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Write helpers
// ----------------------------------------------------------------------

fn discipline_title_taken(conn: &Connection, title: &str, except: Option<i64>) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM disciplines WHERE title = ?1 AND id IS NOT ?2)",
        params![title, except],
        |row| row.get(0),
    )?)
}

fn module_title_taken(
    conn: &Connection,
    discipline_id: i64,
    title: &str,
    except: Option<i64>,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM modules
                       WHERE discipline_id = ?1 AND title = ?2 AND id IS NOT ?3)",
        params![discipline_id, title, except],
        |row| row.get(0),
    )?)
}

fn lesson_title_taken(
    conn: &Connection,
    module_id: i64,
    title: &str,
    except: Option<i64>,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM lessons
                       WHERE module_id = ?1 AND title = ?2 AND id IS NOT ?3)",
        params![module_id, title, except],
        |row| row.get(0),
    )?)
}

fn question_exists(conn: &Connection, question_id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM questions WHERE id = ?1)",
        params![question_id],
        |row| row.get(0),
    )?)
}

fn require_exercise_block(conn: &Connection, block_id: i64) -> Result<()> {
    let block = fetch_block(conn, block_id)?
        .ok_or_else(|| LexisError::not_found("Lesson block", block_id))?;
    if block.block_type == BlockType::Theory {
        return Err(LexisError::InvalidInput(
            "questions can only be added to exercise blocks".to_string(),
        ));
    }
    Ok(())
}

/// Make `edits` the question set of the block; returns how many were removed
fn replace_questions(conn: &Connection, block_id: i64, edits: Vec<QuestionEdit>) -> Result<usize> {
    let existing: HashSet<i64> = questions_of(conn, block_id)?.iter().map(|q| q.id).collect();
    let mut kept = HashSet::new();

    for edit in edits {
        match edit.id {
            Some(id) if existing.contains(&id) => {
                apply_question_update(conn, id, &edit.changes)?;
                kept.insert(id);
            }
            Some(id) => return Err(LexisError::not_found("Question", id)),
            None => {
                insert_question(conn, block_id, &edit.changes.into_new()?)?;
            }
        }
    }

    let mut removed = 0;
    for id in existing.difference(&kept) {
        removed += conn.execute("DELETE FROM questions WHERE id = ?1", params![id])?;
    }
    Ok(removed)
}

fn apply_question_update(
    conn: &Connection,
    question_id: i64,
    changes: &QuestionUpdate,
) -> Result<Question> {
    if !question_exists(conn, question_id)? {
        return Err(LexisError::not_found("Question", question_id));
    }
    if changes.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(LexisError::InvalidInput(
            "question text must not be empty".to_string(),
        ));
    }

    conn.execute(
        "UPDATE questions
         SET text = COALESCE(?1, text),
             question_type = COALESCE(?2, question_type),
             correct_answer_text = COALESCE(?3, correct_answer_text),
             general_explanation = COALESCE(?4, general_explanation)
         WHERE id = ?5",
        params![
            changes.text,
            changes.question_type,
            changes.correct_answer_text,
            changes.general_explanation,
            question_id
        ],
    )?;

    if let Some(edits) = &changes.options {
        let existing: HashSet<i64> = options_of(conn, question_id)?.iter().map(|o| o.id).collect();
        let mut kept = HashSet::new();

        for edit in edits {
            match edit.id {
                Some(id) if existing.contains(&id) => {
                    let text = edit
                        .text
                        .as_deref()
                        .map(|t| require_option_text(Some(t)))
                        .transpose()?;
                    conn.execute(
                        "UPDATE question_options
                         SET text = COALESCE(?1, text), is_correct = COALESCE(?2, is_correct)
                         WHERE id = ?3",
                        params![text, edit.is_correct, id],
                    )?;
                    kept.insert(id);
                }
                Some(id) => return Err(LexisError::not_found("Question option", id)),
                None => {
                    conn.execute(
                        "INSERT INTO question_options (question_id, text, is_correct)
                         VALUES (?1, ?2, ?3)",
                        params![
                            question_id,
                            require_option_text(edit.text.as_deref())?,
                            edit.is_correct.unwrap_or(false)
                        ],
                    )?;
                }
            }
        }

        for id in existing.difference(&kept) {
            conn.execute("DELETE FROM question_options WHERE id = ?1", params![id])?;
        }
    }

    load_question(conn, question_id)?
        .ok_or_else(|| LexisError::Persistence("updated question vanished".to_string()))
}

// ----------------------------------------------------------------------
// Row helpers shared with the progress core
// ----------------------------------------------------------------------

pub(crate) fn fetch_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS);
    Ok(conn
        .query_row(&sql, params![user_id], User::from_row)
        .optional()?)
}

pub(crate) fn fetch_discipline(
    conn: &Connection,
    discipline_id: i64,
) -> Result<Option<Discipline>> {
    let sql = format!("SELECT {} FROM disciplines WHERE id = ?1", Discipline::COLUMNS);
    Ok(conn
        .query_row(&sql, params![discipline_id], Discipline::from_row)
        .optional()?)
}

pub(crate) fn fetch_module(conn: &Connection, module_id: i64) -> Result<Option<Module>> {
    let sql = format!("SELECT {} FROM modules WHERE id = ?1", Module::COLUMNS);
    Ok(conn
        .query_row(&sql, params![module_id], Module::from_row)
        .optional()?)
}

pub(crate) fn fetch_lesson(conn: &Connection, lesson_id: i64) -> Result<Option<Lesson>> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?1", Lesson::COLUMNS);
    Ok(conn
        .query_row(&sql, params![lesson_id], Lesson::from_row)
        .optional()?)
}

fn fetch_block(conn: &Connection, block_id: i64) -> Result<Option<LessonBlock>> {
    let sql = format!("SELECT {} FROM lesson_blocks WHERE id = ?1", LessonBlock::COLUMNS);
    Ok(conn
        .query_row(&sql, params![block_id], LessonBlock::from_row)
        .optional()?)
}

fn fetch_option(conn: &Connection, option_id: i64) -> Result<Option<QuestionOption>> {
    let sql = format!(
        "SELECT {} FROM question_options WHERE id = ?1",
        QuestionOption::COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![option_id], QuestionOption::from_row)
        .optional()?)
}

pub(crate) fn modules_of(conn: &Connection, discipline_id: i64) -> Result<Vec<Module>> {
    let sql = format!(
        "SELECT {} FROM modules WHERE discipline_id = ?1 ORDER BY sort_order, id",
        Module::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![discipline_id], Module::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn lessons_of(conn: &Connection, module_id: i64) -> Result<Vec<Lesson>> {
    let sql = format!(
        "SELECT {} FROM lessons WHERE module_id = ?1 ORDER BY sort_order, id",
        Lesson::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![module_id], Lesson::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn options_of(conn: &Connection, question_id: i64) -> Result<Vec<QuestionOption>> {
    let sql = format!(
        "SELECT {} FROM question_options WHERE question_id = ?1 ORDER BY id",
        QuestionOption::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![question_id], QuestionOption::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Load a question with its options eagerly
pub(crate) fn load_question(conn: &Connection, question_id: i64) -> Result<Option<Question>> {
    let sql = format!("SELECT {} FROM questions WHERE id = ?1", Question::COLUMNS);
    let question = conn
        .query_row(&sql, params![question_id], Question::from_row)
        .optional()?;

    match question {
        Some(mut question) => {
            question.options = options_of(conn, question.id)?;
            Ok(Some(question))
        }
        None => Ok(None),
    }
}

fn questions_of(conn: &Connection, block_id: i64) -> Result<Vec<Question>> {
    let sql = format!(
        "SELECT {} FROM questions WHERE lesson_block_id = ?1 ORDER BY id",
        Question::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let questions = stmt
        .query_map(params![block_id], Question::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    questions
        .into_iter()
        .map(|mut question| {
            question.options = options_of(conn, question.id)?;
            Ok(question)
        })
        .collect()
}

fn insert_question(conn: &Connection, block_id: i64, new: &NewQuestion) -> Result<Question> {
    if new.text.trim().is_empty() {
        return Err(LexisError::InvalidInput(
            "question text must not be empty".to_string(),
        ));
    }

    conn.execute(
        "INSERT INTO questions
            (lesson_block_id, text, question_type, correct_answer_text, general_explanation)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            block_id,
            new.text,
            new.question_type,
            new.correct_answer_text,
            new.general_explanation
        ],
    )?;
    let question_id = conn.last_insert_rowid();

    for option in &new.options {
        conn.execute(
            "INSERT INTO question_options (question_id, text, is_correct) VALUES (?1, ?2, ?3)",
            params![question_id, option.text, option.is_correct],
        )?;
    }

    load_question(conn, question_id)?
        .ok_or_else(|| LexisError::Persistence("created question vanished".to_string()))
}
