//! XP awarding for lesson completions and answered questions.
//!
//! Each entry point runs in a single immediate transaction: the user and
//! progress rows are read and written under one write lock, so concurrent
//! submissions for a user serialise instead of double-awarding. Events are
//! published only after the commit.

use crate::config::XpRewards;
use crate::content::{fetch_lesson, fetch_user, load_question};
use crate::db::LearningDb;
use crate::error::{LexisError, Result};
use crate::events::{EventBus, ProgressEvent};
use crate::grading::{grade, Answer, CorrectAnswerDetails};
use crate::models::{UserLessonProgress, UserQuestionProgress};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Progress row after a completion, with the award attached for the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonCompletion {
    #[serde(flatten)]
    pub progress: UserLessonProgress,
    pub xp_awarded: i64,
    pub total_xp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub explanation: Option<String>,
    pub correct_answer_details: CorrectAnswerDetails,
    pub xp_awarded: i64,
}

pub struct XpAwarder {
    db: Arc<LearningDb>,
    bus: Arc<EventBus>,
    rewards: XpRewards,
}

impl XpAwarder {
    pub fn new(db: Arc<LearningDb>, bus: Arc<EventBus>, rewards: XpRewards) -> Self {
        Self { db, bus, rewards }
    }

    pub fn rewards(&self) -> XpRewards {
        self.rewards
    }

    /// Mark a lesson completed and award the tiered completion XP
    pub async fn complete_lesson(&self, user_id: i64, lesson_id: i64) -> Result<LessonCompletion> {
        let rewards = self.rewards;

        let result = self
            .db
            .transaction(move |tx| {
                let user =
                    fetch_user(tx, user_id)?.ok_or_else(|| LexisError::not_found("User", user_id))?;
                if fetch_lesson(tx, lesson_id)?.is_none() {
                    return Err(LexisError::not_found("Lesson", lesson_id));
                }

                let attempts_before: i64 = tx
                    .query_row(
                        "SELECT attempts FROM user_lesson_progress
                         WHERE user_id = ?1 AND lesson_id = ?2",
                        params![user_id, lesson_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(0);
                let xp_awarded = rewards.for_completion(attempts_before);

                tx.execute(
                    "INSERT INTO user_lesson_progress (user_id, lesson_id, attempts, completed_at)
                     VALUES (?1, ?2, 1, ?3)
                     ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                        attempts = attempts + 1,
                        completed_at = excluded.completed_at",
                    params![user_id, lesson_id, Utc::now()],
                )?;
                tx.execute(
                    "UPDATE users SET xp_points = xp_points + ?1 WHERE id = ?2",
                    params![xp_awarded, user_id],
                )?;

                let progress = fetch_lesson_progress(tx, user_id, lesson_id)?.ok_or_else(|| {
                    LexisError::Persistence("lesson progress row vanished".to_string())
                })?;

                Ok(LessonCompletion {
                    progress,
                    xp_awarded,
                    total_xp: user.xp_points + xp_awarded,
                })
            })
            .await;

        match result {
            Ok(completion) => {
                info!(
                    user_id,
                    lesson_id,
                    attempts = completion.progress.attempts,
                    xp_awarded = completion.xp_awarded,
                    total_xp = completion.total_xp,
                    "Lesson completed"
                );
                self.bus.publish(ProgressEvent::ProgressChanged { user_id });
                Ok(completion)
            }
            Err(e) => {
                log_rollback("complete_lesson", user_id, "lesson_id", lesson_id, &e);
                Err(e)
            }
        }
    }

    /// Grade an answer, record it and award XP when correct
    pub async fn submit_answer(
        &self,
        user_id: i64,
        question_id: i64,
        answer: Answer,
    ) -> Result<AnswerOutcome> {
        let reward = self.rewards.correct_answer;

        let result = self
            .db
            .transaction(move |tx| {
                if fetch_user(tx, user_id)?.is_none() {
                    return Err(LexisError::not_found("User", user_id));
                }
                let question = load_question(tx, question_id)?
                    .ok_or_else(|| LexisError::not_found("Question", question_id))?;

                let (is_correct, correct_answer_details) = grade(&question, &answer);
                let xp_awarded = if is_correct { reward } else { 0 };

                if xp_awarded > 0 {
                    tx.execute(
                        "UPDATE users SET xp_points = xp_points + ?1 WHERE id = ?2",
                        params![xp_awarded, user_id],
                    )?;
                }

                tx.execute(
                    "INSERT INTO user_question_progress
                        (user_id, question_id, is_correct, answered_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(user_id, question_id) DO UPDATE SET
                        is_correct = excluded.is_correct,
                        answered_at = excluded.answered_at",
                    params![user_id, question_id, is_correct, Utc::now()],
                )?;

                Ok(AnswerOutcome {
                    is_correct,
                    explanation: question.general_explanation,
                    correct_answer_details,
                    xp_awarded,
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                if outcome.xp_awarded > 0 {
                    info!(
                        user_id,
                        question_id,
                        xp_awarded = outcome.xp_awarded,
                        "Correct answer rewarded"
                    );
                    self.bus.publish(ProgressEvent::XpChanged { user_id });
                }
                Ok(outcome)
            }
            Err(e) => {
                log_rollback("submit_answer", user_id, "question_id", question_id, &e);
                Err(e)
            }
        }
    }

    pub async fn lesson_progress(
        &self,
        user_id: i64,
        lesson_id: i64,
    ) -> Result<Option<UserLessonProgress>> {
        self.db
            .execute(move |conn| fetch_lesson_progress(conn, user_id, lesson_id))
            .await
    }

    pub async fn question_progress(
        &self,
        user_id: i64,
        question_id: i64,
    ) -> Result<Option<UserQuestionProgress>> {
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {} FROM user_question_progress WHERE user_id = ?1 AND question_id = ?2",
                    UserQuestionProgress::COLUMNS
                );
                Ok(conn
                    .query_row(&sql, params![user_id, question_id], UserQuestionProgress::from_row)
                    .optional()?)
            })
            .await
    }
}

fn fetch_lesson_progress(
    conn: &Connection,
    user_id: i64,
    lesson_id: i64,
) -> Result<Option<UserLessonProgress>> {
    let sql = format!(
        "SELECT {} FROM user_lesson_progress WHERE user_id = ?1 AND lesson_id = ?2",
        UserLessonProgress::COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![user_id, lesson_id], UserLessonProgress::from_row)
        .optional()?)
}

fn log_rollback(op: &str, user_id: i64, subject: &str, subject_id: i64, err: &LexisError) {
    match err {
        LexisError::Persistence(_) => {
            error!(user_id, subject, subject_id, "{} rolled back: {}", op, err)
        }
        _ => warn!(user_id, subject, subject_id, "{} rejected: {}", op, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbLocation;
    use crate::events::ProgressSubscriber;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSubscriber for Recorder {
        fn on_event(&self, event: &ProgressEvent) {
            self.seen.lock().unwrap().push(*event);
        }
    }

    async fn setup() -> (XpAwarder, Arc<Recorder>) {
        let db = Arc::new(LearningDb::open(DbLocation::InMemory).await.unwrap());
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, created_at) VALUES (1, 'a@b.c', ?1)",
                params![Utc::now()],
            )?;
            conn.execute(
                "INSERT INTO disciplines (id, title, created_at) VALUES (1, 'Civil Law', ?1)",
                params![Utc::now()],
            )?;
            conn.execute_batch(
                "INSERT INTO modules (id, discipline_id, title) VALUES (1, 1, 'Contracts');
                 INSERT INTO lessons (id, module_id, title) VALUES (1, 1, 'Offer');
                 INSERT INTO lesson_blocks (id, lesson_id, block_type) VALUES (1, 1, 'exercise');
                 INSERT INTO questions (id, lesson_block_id, text, question_type)
                    VALUES (1, 1, 'Pick one', 'single_choice');
                 INSERT INTO question_options (id, question_id, text, is_correct)
                    VALUES (10, 1, 'Right', 1), (11, 1, 'Wrong', 0);",
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());
        (XpAwarder::new(db, bus, XpRewards::default()), recorder)
    }

    #[tokio::test]
    async fn test_completion_tiers_and_attempts() {
        let (awarder, _) = setup().await;
        let rewards = XpRewards::default();

        let expected = [
            (1, rewards.first_completion),
            (2, rewards.second_completion),
            (3, rewards.subsequent_completion),
        ];
        let mut total = 0;
        for (attempts, xp) in expected {
            let done = awarder.complete_lesson(1, 1).await.unwrap();
            total += xp;
            assert_eq!(done.progress.attempts, attempts);
            assert_eq!(done.xp_awarded, xp);
            assert_eq!(done.total_xp, total);
            assert!(done.progress.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_completion_publishes_progress_changed() {
        let (awarder, recorder) = setup().await;
        awarder.complete_lesson(1, 1).await.unwrap();
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![ProgressEvent::ProgressChanged { user_id: 1 }]
        );
    }

    #[tokio::test]
    async fn test_missing_user_or_lesson() {
        let (awarder, recorder) = setup().await;
        assert_eq!(
            awarder.complete_lesson(9, 1).await.unwrap_err(),
            LexisError::not_found("User", 9)
        );
        assert_eq!(
            awarder.complete_lesson(1, 9).await.unwrap_err(),
            LexisError::not_found("Lesson", 9)
        );
        assert_eq!(
            awarder
                .submit_answer(1, 9, Answer::OptionId(10))
                .await
                .unwrap_err(),
            LexisError::not_found("Question", 9)
        );
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(awarder.lesson_progress(1, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_answer_overwrites_single_row() {
        let (awarder, recorder) = setup().await;

        let right = awarder
            .submit_answer(1, 1, Answer::OptionId(10))
            .await
            .unwrap();
        assert!(right.is_correct);
        assert_eq!(right.xp_awarded, XpRewards::default().correct_answer);

        let wrong = awarder
            .submit_answer(1, 1, Answer::OptionId(11))
            .await
            .unwrap();
        assert!(!wrong.is_correct);
        assert_eq!(wrong.xp_awarded, 0);

        let row = awarder.question_progress(1, 1).await.unwrap().unwrap();
        assert!(!row.is_correct);

        // Only the rewarded answer signals an XP change
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![ProgressEvent::XpChanged { user_id: 1 }]
        );
    }
}
