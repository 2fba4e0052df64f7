//! Per-user learning statistics.
//!
//! Cached under `user_stats`; evicted on any progress or XP event.

use crate::cache::{CacheKey, TtlCache};
use crate::content::fetch_user;
use crate::db::LearningDb;
use crate::error::{LexisError, Result};
use crate::events::{ProgressEvent, ProgressSubscriber};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

pub const USER_STATS: &str = "user_stats";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    /// Lessons in the whole catalogue
    pub total_lessons: i64,
    pub completed_lessons: i64,
    pub completion_percentage: f64,
    pub correct_answers: i64,
    /// Distinct questions answered at least once
    pub total_attempts: i64,
    pub accuracy_percentage: f64,
    pub xp_points: i64,
}

fn ratio_percent(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

pub struct UserStatsReader {
    db: Arc<LearningDb>,
    cache: Arc<TtlCache>,
}

impl UserStatsReader {
    pub fn new(db: Arc<LearningDb>, cache: Arc<TtlCache>) -> Self {
        Self { db, cache }
    }

    pub async fn user_stats(&self, user_id: i64) -> Result<UserStats> {
        let key = CacheKey::new(USER_STATS, &user_id);
        if let Some(hit) = self.cache.get::<UserStats>(&key) {
            return Ok(hit);
        }

        let stats = self
            .db
            .execute(move |conn| {
                let user = fetch_user(conn, user_id)?
                    .ok_or_else(|| LexisError::not_found("User", user_id))?;

                let total_lessons: i64 =
                    conn.query_row("SELECT COUNT(*) FROM lessons", [], |row| row.get(0))?;
                let completed_lessons: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM user_lesson_progress
                     WHERE user_id = ?1 AND completed_at IS NOT NULL",
                    params![user_id],
                    |row| row.get(0),
                )?;
                let (correct_answers, total_attempts): (i64, i64) = conn.query_row(
                    "SELECT COALESCE(SUM(is_correct), 0), COUNT(*)
                     FROM user_question_progress WHERE user_id = ?1",
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                Ok(UserStats {
                    total_lessons,
                    completed_lessons,
                    completion_percentage: ratio_percent(completed_lessons, total_lessons),
                    correct_answers,
                    total_attempts,
                    accuracy_percentage: ratio_percent(correct_answers, total_attempts),
                    xp_points: user.xp_points,
                })
            })
            .await
            .map_err(|e| {
                if let LexisError::Persistence(_) = e {
                    error!(user_id, "Failed to load user stats: {}", e);
                }
                e
            })?;

        self.cache.set(key, stats.clone());
        Ok(stats)
    }
}

impl ProgressSubscriber for UserStatsReader {
    fn on_event(&self, event: &ProgressEvent) {
        let evicted = self.cache.invalidate_function(USER_STATS);
        debug!(%event, evicted, "Invalidated user stats");
    }
}
