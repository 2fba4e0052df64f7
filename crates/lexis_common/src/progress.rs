//! Progress aggregation over the content hierarchy.
//!
//! All three reads are memoised in the shared [`TtlCache`]. Module and
//! discipline summaries never fail: a storage error is logged and a zeroed
//! summary is returned (and not cached). `lesson_completed` propagates.

use crate::cache::{CacheKey, TtlCache};
use crate::content::modules_of;
use crate::db::LearningDb;
use crate::error::Result;
use crate::events::{ProgressEvent, ProgressSubscriber};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

pub const LESSON_COMPLETED: &str = "lesson_completed";
pub const MODULE_PROGRESS: &str = "module_progress";
pub const DISCIPLINE_PROGRESS: &str = "discipline_progress";

/// Lesson completion within one module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percent: i64,
}

/// Module completion within one discipline.
///
/// `percent` counts fully completed modules; the lesson totals are reported
/// alongside and do not feed into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisciplineProgress {
    pub completed_modules: i64,
    pub total_modules: i64,
    pub total_lessons: i64,
    pub completed_lessons: i64,
    pub percent: i64,
}

/// floor(100 * part / whole), 0 for an empty whole
pub fn percent_of(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        part * 100 / whole
    } else {
        0
    }
}

pub struct ProgressAggregator {
    db: Arc<LearningDb>,
    cache: Arc<TtlCache>,
}

impl ProgressAggregator {
    pub fn new(db: Arc<LearningDb>, cache: Arc<TtlCache>) -> Self {
        Self { db, cache }
    }

    /// Whether the user has a completed progress row for the lesson
    pub async fn lesson_completed(&self, user_id: i64, lesson_id: i64) -> Result<bool> {
        let key = CacheKey::new(LESSON_COMPLETED, &(user_id, lesson_id));
        if let Some(hit) = self.cache.get::<bool>(&key) {
            return Ok(hit);
        }

        let completed = self
            .db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM user_lesson_progress
                        WHERE user_id = ?1 AND lesson_id = ?2 AND completed_at IS NOT NULL
                    )",
                    params![user_id, lesson_id],
                    |row| row.get(0),
                )?)
            })
            .await?;

        self.cache.set(key, completed);
        Ok(completed)
    }

    pub async fn module_progress(&self, user_id: i64, module_id: i64) -> ModuleProgress {
        match self.try_module_progress(user_id, module_id).await {
            Ok(progress) => progress,
            Err(e) => {
                error!(user_id, module_id, "Failed to compute module progress: {}", e);
                ModuleProgress::default()
            }
        }
    }

    pub async fn discipline_progress(
        &self,
        user_id: i64,
        discipline_id: i64,
    ) -> DisciplineProgress {
        match self.try_discipline_progress(user_id, discipline_id).await {
            Ok(progress) => progress,
            Err(e) => {
                error!(
                    user_id,
                    discipline_id, "Failed to compute discipline progress: {}", e
                );
                DisciplineProgress::default()
            }
        }
    }

    async fn try_module_progress(&self, user_id: i64, module_id: i64) -> Result<ModuleProgress> {
        let key = CacheKey::new(MODULE_PROGRESS, &(user_id, module_id));
        if let Some(hit) = self.cache.get::<ModuleProgress>(&key) {
            return Ok(hit);
        }

        let (total_lessons, completed_lessons) = self
            .db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(l.id), COUNT(p.id)
                     FROM lessons l
                     LEFT JOIN user_lesson_progress p
                        ON p.lesson_id = l.id
                       AND p.user_id = ?1
                       AND p.completed_at IS NOT NULL
                     WHERE l.module_id = ?2",
                    params![user_id, module_id],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?)
            })
            .await?;

        let progress = ModuleProgress {
            completed_lessons,
            total_lessons,
            percent: percent_of(completed_lessons, total_lessons),
        };
        self.cache.set(key, progress);
        Ok(progress)
    }

    async fn try_discipline_progress(
        &self,
        user_id: i64,
        discipline_id: i64,
    ) -> Result<DisciplineProgress> {
        let key = CacheKey::new(DISCIPLINE_PROGRESS, &(user_id, discipline_id));
        if let Some(hit) = self.cache.get::<DisciplineProgress>(&key) {
            return Ok(hit);
        }

        let modules = self
            .db
            .execute(move |conn| modules_of(conn, discipline_id))
            .await?;

        let mut summary = DisciplineProgress {
            total_modules: modules.len() as i64,
            ..DisciplineProgress::default()
        };
        for module in &modules {
            let progress = self.try_module_progress(user_id, module.id).await?;
            summary.total_lessons += progress.total_lessons;
            summary.completed_lessons += progress.completed_lessons;
            if progress.completed_lessons > 0
                && progress.completed_lessons == progress.total_lessons
            {
                summary.completed_modules += 1;
            }
        }
        summary.percent = percent_of(summary.completed_modules, summary.total_modules);

        self.cache.set(key, summary);
        Ok(summary)
    }
}

impl ProgressSubscriber for ProgressAggregator {
    fn on_event(&self, event: &ProgressEvent) {
        if let ProgressEvent::XpChanged { .. } = event {
            return;
        }
        let evicted: usize = [LESSON_COMPLETED, MODULE_PROGRESS, DISCIPLINE_PROGRESS]
            .iter()
            .map(|function| self.cache.invalidate_function(function))
            .sum();
        debug!(%event, evicted, "Invalidated progress aggregates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbLocation;
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        db: Arc<LearningDb>,
        cache: Arc<TtlCache>,
        aggregator: ProgressAggregator,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(LearningDb::open(DbLocation::InMemory).await.unwrap());
        let cache = Arc::new(TtlCache::new(Duration::from_secs(300), 100));
        let aggregator = ProgressAggregator::new(db.clone(), cache.clone());
        Fixture {
            db,
            cache,
            aggregator,
        }
    }

    /// user 1; discipline 1 with module 1 (lessons 1, 2) and module 2 (no lessons)
    async fn seed(db: &LearningDb) {
        db.execute(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO users (id, email, created_at) VALUES (1, 'a@b.c', ?1)",
                params![now],
            )?;
            conn.execute(
                "INSERT INTO disciplines (id, title, created_at) VALUES (1, 'Civil Law', ?1)",
                params![now],
            )?;
            conn.execute_batch(
                "INSERT INTO modules (id, discipline_id, title, sort_order)
                     VALUES (1, 1, 'Contracts', 0), (2, 1, 'Empty', 1);
                 INSERT INTO lessons (id, module_id, title, sort_order)
                     VALUES (1, 1, 'Offer', 0), (2, 1, 'Acceptance', 1);",
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    async fn complete(db: &LearningDb, lesson_id: i64) {
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO user_lesson_progress (user_id, lesson_id, attempts, completed_at)
                 VALUES (1, ?1, 1, ?2)",
                params![lesson_id, Utc::now()],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_percent_floors() {
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 66);
        assert_eq!(percent_of(3, 3), 100);
        assert_eq!(percent_of(0, 0), 0);
    }

    #[tokio::test]
    async fn test_module_progress_counts() {
        let f = fixture().await;
        seed(&f.db).await;
        complete(&f.db, 1).await;

        let progress = f.aggregator.module_progress(1, 1).await;
        assert_eq!(
            progress,
            ModuleProgress {
                completed_lessons: 1,
                total_lessons: 2,
                percent: 50
            }
        );

        assert_eq!(f.aggregator.module_progress(1, 2).await, ModuleProgress::default());
    }

    #[tokio::test]
    async fn test_empty_module_never_counts_as_completed() {
        let f = fixture().await;
        seed(&f.db).await;
        complete(&f.db, 1).await;
        complete(&f.db, 2).await;

        let progress = f.aggregator.discipline_progress(1, 1).await;
        assert_eq!(
            progress,
            DisciplineProgress {
                completed_modules: 1,
                total_modules: 2,
                total_lessons: 2,
                completed_lessons: 2,
                percent: 50,
            }
        );
    }

    #[tokio::test]
    async fn test_cached_until_progress_changed() {
        let f = fixture().await;
        seed(&f.db).await;

        assert!(!f.aggregator.lesson_completed(1, 1).await.unwrap());
        complete(&f.db, 1).await;
        // Still served from cache
        assert!(!f.aggregator.lesson_completed(1, 1).await.unwrap());

        f.aggregator
            .on_event(&ProgressEvent::ProgressChanged { user_id: 1 });
        assert!(f.aggregator.lesson_completed(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_xp_changed_leaves_progress_cached() {
        let f = fixture().await;
        seed(&f.db).await;

        f.aggregator.module_progress(1, 1).await;
        f.aggregator.discipline_progress(1, 1).await;
        let cached = f.cache.len();
        assert!(cached >= 2);

        f.aggregator.on_event(&ProgressEvent::XpChanged { user_id: 1 });
        assert_eq!(f.cache.len(), cached);

        f.aggregator
            .on_event(&ProgressEvent::ProgressChanged { user_id: 1 });
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_changed_evicts_every_user() {
        let f = fixture().await;
        seed(&f.db).await;

        f.aggregator.module_progress(1, 1).await;
        f.aggregator.module_progress(2, 1).await;
        assert!(!f.cache.is_empty());

        f.aggregator.on_event(&ProgressEvent::CatalogChanged);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_degrades_to_zero() {
        let f = fixture().await;
        seed(&f.db).await;
        f.db.execute(|conn| {
            conn.execute_batch("DROP TABLE user_lesson_progress")?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(f.aggregator.module_progress(1, 1).await, ModuleProgress::default());
        assert_eq!(
            f.aggregator.discipline_progress(1, 1).await,
            DisciplineProgress::default()
        );
        assert!(f.cache.is_empty());

        assert!(f.aggregator.lesson_completed(1, 1).await.is_err());
    }
}
