//! Persisted entities of the learning platform.
//!
//! Discipline -> Module -> Lesson -> LessonBlock -> Question -> QuestionOption,
//! plus users and their per-lesson / per-question progress rows.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub xp_points: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub(crate) const COLUMNS: &'static str =
        "id, email, full_name, is_active, xp_points, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            is_active: row.get(3)?,
            xp_points: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discipline {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Discipline {
    pub(crate) const COLUMNS: &'static str = "id, title, description, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: i64,
    pub discipline_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
}

impl Module {
    pub(crate) const COLUMNS: &'static str = "id, discipline_id, title, description, sort_order";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            discipline_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            order: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub order: i64,
}

impl Lesson {
    pub(crate) const COLUMNS: &'static str = "id, module_id, title, sort_order";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            module_id: row.get(1)?,
            title: row.get(2)?,
            order: row.get(3)?,
        })
    }
}

/// Kind of content a lesson block carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Theory,
    Exercise,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Theory => "theory",
            BlockType::Exercise => "exercise",
        }
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theory" => Ok(BlockType::Theory),
            "exercise" => Ok(BlockType::Exercise),
            other => Err(format!("unknown block type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonBlock {
    pub id: i64,
    pub lesson_id: i64,
    pub order_in_lesson: i64,
    pub block_type: BlockType,
    pub theory_text: Option<String>,
}

impl LessonBlock {
    pub(crate) const COLUMNS: &'static str =
        "id, lesson_id, order_in_lesson, block_type, theory_text";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lesson_id: row.get(1)?,
            order_in_lesson: row.get(2)?,
            block_type: row.get(3)?,
            theory_text: row.get(4)?,
        })
    }
}

/// Answer-checking semantics of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    FillInBlank,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillInBlank => "fill_in_blank",
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_choice" => Ok(QuestionType::SingleChoice),
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "fill_in_blank" => Ok(QuestionType::FillInBlank),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum_sql!(BlockType);
text_enum_sql!(QuestionType);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
}

impl QuestionOption {
    pub(crate) const COLUMNS: &'static str = "id, question_id, text, is_correct";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            question_id: row.get(1)?,
            text: row.get(2)?,
            is_correct: row.get(3)?,
        })
    }
}

/// A question together with its options (ordered by id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub lesson_block_id: i64,
    pub text: String,
    pub question_type: QuestionType,
    pub correct_answer_text: Option<String>,
    pub general_explanation: Option<String>,
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub(crate) const COLUMNS: &'static str =
        "id, lesson_block_id, text, question_type, correct_answer_text, general_explanation";

    /// Map the question columns; options are loaded separately
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lesson_block_id: row.get(1)?,
            text: row.get(2)?,
            question_type: row.get(3)?,
            correct_answer_text: row.get(4)?,
            general_explanation: row.get(5)?,
            options: Vec::new(),
        })
    }

    pub fn correct_options(&self) -> impl Iterator<Item = &QuestionOption> {
        self.options.iter().filter(|opt| opt.is_correct)
    }
}

/// One row per (user, lesson); `attempts` counts completion submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLessonProgress {
    pub id: i64,
    pub user_id: i64,
    pub lesson_id: i64,
    pub attempts: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UserLessonProgress {
    pub(crate) const COLUMNS: &'static str = "id, user_id, lesson_id, attempts, completed_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            lesson_id: row.get(2)?,
            attempts: row.get(3)?,
            completed_at: row.get(4)?,
        })
    }
}

/// One row per (user, question); overwritten on every submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuestionProgress {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

impl UserQuestionProgress {
    pub(crate) const COLUMNS: &'static str = "id, user_id, question_id, is_correct, answered_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            question_id: row.get(2)?,
            is_correct: row.get(3)?,
            answered_at: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_text_roundtrip() {
        for qt in [
            QuestionType::SingleChoice,
            QuestionType::MultipleChoice,
            QuestionType::TrueFalse,
            QuestionType::FillInBlank,
        ] {
            assert_eq!(qt.as_str().parse::<QuestionType>(), Ok(qt));
        }
        assert!("essay".parse::<QuestionType>().is_err());
    }

    #[test]
    fn test_question_type_serde_matches_storage_text() {
        let json = serde_json::to_string(&QuestionType::FillInBlank).unwrap();
        assert_eq!(json, "\"fill_in_blank\"");
        let json = serde_json::to_string(&BlockType::Exercise).unwrap();
        assert_eq!(json, "\"exercise\"");
    }
}
