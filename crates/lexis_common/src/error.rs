//! Error types for Lexis.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexisError {
    #[error("{entity} with id '{id}' not found.")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} with {field} '{value}' already exists.")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database operation failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, LexisError>;

impl LexisError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LexisError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        LexisError::Duplicate {
            entity,
            field,
            value: value.into(),
        }
    }

    /// Suggested HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            LexisError::NotFound { .. } => 404,
            LexisError::Duplicate { .. } => 409,
            LexisError::InvalidInput(_) => 400,
            LexisError::Persistence(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for LexisError {
    fn from(e: rusqlite::Error) -> Self {
        LexisError::Persistence(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LexisError {
    fn from(e: tokio::task::JoinError) -> Self {
        LexisError::Persistence(format!("database task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(LexisError::not_found("Lesson", 7).status_code(), 404);
        assert_eq!(
            LexisError::duplicate("Module", "title", "Intro").status_code(),
            409
        );
        assert_eq!(LexisError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(LexisError::Persistence("x".into()).status_code(), 500);
    }

    #[test]
    fn test_messages_are_readable() {
        let err = LexisError::not_found("Question", 42);
        assert_eq!(err.to_string(), "Question with id '42' not found.");

        let err = LexisError::duplicate("Discipline", "title", "Roman Law");
        assert_eq!(
            err.to_string(),
            "Discipline with title 'Roman Law' already exists."
        );
    }

    #[test]
    fn test_storage_errors_become_persistence() {
        let err: LexisError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, LexisError::Persistence(_)));
    }
}
