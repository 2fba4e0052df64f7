//! Catalogue views joining persisted content with a user's progress.

use crate::content::{fetch_discipline, lessons_of, modules_of, ContentRepository};
use crate::db::LearningDb;
use crate::error::{LexisError, Result};
use crate::models::{Discipline, Lesson, Module};
use crate::progress::{DisciplineProgress, ModuleProgress, ProgressAggregator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonView {
    #[serde(flatten)]
    pub lesson: Lesson,
    /// `None` for anonymous reads
    pub is_completed_by_user: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleView {
    #[serde(flatten)]
    pub module: Module,
    pub progress: Option<ModuleProgress>,
    pub lessons: Vec<LessonView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineView {
    #[serde(flatten)]
    pub discipline: Discipline,
    pub progress: Option<DisciplineProgress>,
    pub modules: Vec<ModuleView>,
}

pub struct CatalogReader {
    db: Arc<LearningDb>,
    content: Arc<ContentRepository>,
    progress: Arc<ProgressAggregator>,
}

impl CatalogReader {
    pub fn new(
        db: Arc<LearningDb>,
        content: Arc<ContentRepository>,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            db,
            content,
            progress,
        }
    }

    /// Full discipline tree, annotated with progress when `user_id` is known
    pub async fn discipline_view(
        &self,
        discipline_id: i64,
        user_id: Option<i64>,
    ) -> Result<DisciplineView> {
        let (discipline, tree) = self
            .db
            .execute(move |conn| {
                let discipline = fetch_discipline(conn, discipline_id)?
                    .ok_or_else(|| LexisError::not_found("Discipline", discipline_id))?;
                let tree = modules_of(conn, discipline_id)?
                    .into_iter()
                    .map(|module| {
                        let lessons = lessons_of(conn, module.id)?;
                        Ok((module, lessons))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((discipline, tree))
            })
            .await?;

        self.assemble(discipline, tree, user_id).await
    }

    pub async fn list_discipline_views(
        &self,
        skip: u32,
        limit: u32,
        user_id: Option<i64>,
    ) -> Result<Vec<DisciplineView>> {
        let disciplines = self.content.list_disciplines(skip, limit).await?;

        let mut views = Vec::with_capacity(disciplines.len());
        for discipline in disciplines {
            views.push(self.discipline_view(discipline.id, user_id).await?);
        }
        Ok(views)
    }

    async fn assemble(
        &self,
        discipline: Discipline,
        tree: Vec<(Module, Vec<Lesson>)>,
        user_id: Option<i64>,
    ) -> Result<DisciplineView> {
        let mut modules = Vec::with_capacity(tree.len());
        for (module, lessons) in tree {
            let mut lesson_views = Vec::with_capacity(lessons.len());
            for lesson in lessons {
                let is_completed_by_user = match user_id {
                    Some(user_id) => {
                        Some(self.progress.lesson_completed(user_id, lesson.id).await?)
                    }
                    None => None,
                };
                lesson_views.push(LessonView {
                    lesson,
                    is_completed_by_user,
                });
            }

            let progress = match user_id {
                Some(user_id) => Some(self.progress.module_progress(user_id, module.id).await),
                None => None,
            };
            modules.push(ModuleView {
                module,
                progress,
                lessons: lesson_views,
            });
        }

        let progress = match user_id {
            Some(user_id) => Some(
                self.progress
                    .discipline_progress(user_id, discipline.id)
                    .await,
            ),
            None => None,
        };

        Ok(DisciplineView {
            discipline,
            progress,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::content::{NewDiscipline, NewLesson, NewModule};
    use crate::db::DbLocation;
    use crate::events::EventBus;
    use chrono::Utc;
    use rusqlite::params;
    use std::time::Duration;

    async fn catalog() -> (CatalogReader, Arc<ContentRepository>, Arc<LearningDb>) {
        let db = Arc::new(LearningDb::open(DbLocation::InMemory).await.unwrap());
        let cache = Arc::new(TtlCache::new(Duration::from_secs(300), 100));
        let content = Arc::new(ContentRepository::new(db.clone(), Arc::new(EventBus::new())));
        let progress = Arc::new(ProgressAggregator::new(db.clone(), cache));
        (
            CatalogReader::new(db.clone(), content.clone(), progress),
            content,
            db,
        )
    }

    #[tokio::test]
    async fn test_anonymous_view_has_no_progress() {
        let (catalog, content, _) = catalog().await;
        let d = content
            .create_discipline(NewDiscipline {
                title: "Civil Law".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let m = content
            .create_module(NewModule {
                discipline_id: d.id,
                title: "Contracts".to_string(),
                description: None,
                order: 0,
            })
            .await
            .unwrap();
        content
            .create_lesson(NewLesson {
                module_id: m.id,
                title: "Offer".to_string(),
                order: 0,
            })
            .await
            .unwrap();

        let view = catalog.discipline_view(d.id, None).await.unwrap();
        assert_eq!(view.progress, None);
        assert_eq!(view.modules.len(), 1);
        assert_eq!(view.modules[0].progress, None);
        assert_eq!(view.modules[0].lessons[0].is_completed_by_user, None);
    }

    #[tokio::test]
    async fn test_user_view_is_annotated() {
        let (catalog, content, db) = catalog().await;
        let d = content
            .create_discipline(NewDiscipline {
                title: "Civil Law".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let m = content
            .create_module(NewModule {
                discipline_id: d.id,
                title: "Contracts".to_string(),
                description: None,
                order: 0,
            })
            .await
            .unwrap();
        let lesson = content
            .create_lesson(NewLesson {
                module_id: m.id,
                title: "Offer".to_string(),
                order: 0,
            })
            .await
            .unwrap();

        let lesson_id = lesson.id;
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, created_at) VALUES (1, 'a@b.c', ?1)",
                params![Utc::now()],
            )?;
            conn.execute(
                "INSERT INTO user_lesson_progress (user_id, lesson_id, attempts, completed_at)
                 VALUES (1, ?1, 1, ?2)",
                params![lesson_id, Utc::now()],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let view = catalog.discipline_view(d.id, Some(1)).await.unwrap();
        assert_eq!(view.modules[0].lessons[0].is_completed_by_user, Some(true));
        assert_eq!(view.modules[0].progress.unwrap().percent, 100);
        assert_eq!(view.progress.unwrap().completed_modules, 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["title"], "Civil Law");
        assert_eq!(json["modules"][0]["lessons"][0]["is_completed_by_user"], true);
    }

    #[tokio::test]
    async fn test_missing_discipline() {
        let (catalog, _, _) = catalog().await;
        assert_eq!(
            catalog.discipline_view(5, None).await.unwrap_err(),
            LexisError::not_found("Discipline", 5)
        );
    }
}
