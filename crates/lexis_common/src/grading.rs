//! Answer checking per question type.
//!
//! Grading is pure: it looks only at the loaded question and the submitted
//! answer. The correct answer is always reported back for feedback.

use crate::error::{LexisError, Result};
use crate::models::{Question, QuestionType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// A submitted answer, shaped by what the client sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Bool(bool),
    OptionId(i64),
    OptionIds(Vec<i64>),
    Text(String),
}

impl Answer {
    /// Interpret a raw JSON answer.
    ///
    /// Null, objects, floats and arrays holding anything but integers are
    /// rejected as invalid input.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(Answer::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Answer::OptionId).ok_or_else(|| {
                LexisError::InvalidInput(format!("answer '{}' is not an option id", n))
            }),
            Value::String(s) => Ok(Answer::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_i64().ok_or_else(|| {
                        LexisError::InvalidInput(format!(
                            "answer item '{}' is not an option id",
                            item
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Answer::OptionIds),
            Value::Null => Err(LexisError::InvalidInput("answer is missing".to_string())),
            Value::Object(_) => Err(LexisError::InvalidInput(
                "answer must be a bool, a number, a list of numbers or a string".to_string(),
            )),
        }
    }
}

/// Correct answer revealed after grading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectAnswerDetails {
    SingleChoice {
        correct_option_id: Option<i64>,
        correct_option_text: Option<String>,
    },
    MultipleChoice {
        correct_option_ids: Vec<i64>,
        correct_option_texts: Vec<String>,
    },
    TrueFalse {
        correct_bool_answer: Option<bool>,
    },
    FillInBlank {
        correct_text_answer: Option<String>,
    },
}

/// Grade `answer` against `question`.
///
/// An answer of the wrong shape for the question type is simply incorrect.
pub fn grade(question: &Question, answer: &Answer) -> (bool, CorrectAnswerDetails) {
    match question.question_type {
        QuestionType::SingleChoice => {
            let correct = question.correct_options().next();
            let is_correct = match (correct, answer) {
                (Some(option), Answer::OptionId(id)) => option.id == *id,
                _ => false,
            };
            let details = CorrectAnswerDetails::SingleChoice {
                correct_option_id: correct.map(|o| o.id),
                correct_option_text: correct.map(|o| o.text.clone()),
            };
            (is_correct, details)
        }
        QuestionType::MultipleChoice => {
            let correct_ids: BTreeSet<i64> = question.correct_options().map(|o| o.id).collect();
            let is_correct = match answer {
                Answer::OptionIds(ids) => {
                    ids.iter().copied().collect::<BTreeSet<_>>() == correct_ids
                }
                _ => false,
            };
            let details = CorrectAnswerDetails::MultipleChoice {
                correct_option_ids: correct_ids.into_iter().collect(),
                correct_option_texts: question.correct_options().map(|o| o.text.clone()).collect(),
            };
            (is_correct, details)
        }
        QuestionType::TrueFalse => {
            let stored = question
                .correct_answer_text
                .as_deref()
                .filter(|text| !text.is_empty())
                .map(|text| text.trim().eq_ignore_ascii_case("true"));
            let is_correct = match answer {
                Answer::Bool(b) => *b == stored.unwrap_or(false),
                _ => false,
            };
            (
                is_correct,
                CorrectAnswerDetails::TrueFalse {
                    correct_bool_answer: stored,
                },
            )
        }
        QuestionType::FillInBlank => {
            let expected = question
                .correct_answer_text
                .as_deref()
                .unwrap_or("")
                .trim()
                .to_lowercase();
            let is_correct = match answer {
                Answer::Text(text) => text.trim().to_lowercase() == expected,
                _ => false,
            };
            (
                is_correct,
                CorrectAnswerDetails::FillInBlank {
                    correct_text_answer: question.correct_answer_text.clone(),
                },
            )
        }
    }
}
