//! Lexis Common - learning content, progress aggregation and XP awarding

pub mod cache;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod events;
pub mod grading;
pub mod models;
pub mod progress;
pub mod read_model;
pub mod services;
pub mod stats;
pub mod xp;

pub use cache::{CacheKey, Clock, ManualClock, SystemClock, TtlCache};
pub use config::{LexisConfig, XpRewards};
pub use content::{
    BlockUpdate, BlockWithQuestions, ContentRepository, DisciplineUpdate, LessonUpdate,
    ModuleUpdate, NewBlock, NewDiscipline, NewLesson, NewModule, NewOption, NewQuestion, NewUser,
    OptionEdit, OptionUpdate, QuestionEdit, QuestionUpdate,
};
pub use db::{DbLocation, LearningDb};
pub use error::{LexisError, Result};
pub use events::{EventBus, ProgressEvent, ProgressSubscriber};
pub use grading::{grade, Answer, CorrectAnswerDetails};
pub use models::*;
pub use progress::{DisciplineProgress, ModuleProgress, ProgressAggregator};
pub use read_model::{CatalogReader, DisciplineView, LessonView, ModuleView};
pub use services::Services;
pub use stats::{UserStats, UserStatsReader};
pub use xp::{AnswerOutcome, LessonCompletion, XpAwarder};
