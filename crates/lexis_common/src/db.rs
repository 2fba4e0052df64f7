//! Database Connection Management for learning content and progress

use crate::error::{LexisError, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Database location
#[derive(Debug, Clone)]
pub enum DbLocation {
    /// System mode: /var/lib/lexis/lexis.db
    Default,
    /// Custom path (config or tests)
    Custom(PathBuf),
    /// Private in-memory database, gone when the handle drops
    InMemory,
}

impl DbLocation {
    pub fn path(&self) -> Option<PathBuf> {
        match self {
            DbLocation::Default => Some(PathBuf::from("/var/lib/lexis/lexis.db")),
            DbLocation::Custom(path) => Some(path.clone()),
            DbLocation::InMemory => None,
        }
    }
}

/// SQLite handle (single connection with mutex)
pub struct LearningDb {
    conn: Arc<Mutex<Connection>>,
    location: DbLocation,
}

impl LearningDb {
    /// Open or create database at the specified location
    pub async fn open(location: DbLocation) -> Result<Self> {
        let db_path = location.path();

        if let Some(parent) = db_path.as_ref().and_then(|p| p.parent()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LexisError::Persistence(format!("Failed to create database directory: {}", e))
            })?;
        }

        match &db_path {
            Some(path) => info!("Opening learning database at: {}", path.display()),
            None => info!("Opening in-memory learning database"),
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = match db_path {
                Some(path) => Connection::open(&path)?,
                None => Connection::open_in_memory()?,
            };

            // WAL is meaningless for in-memory databases; SQLite answers "memory"
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;

            initialize_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// Execute a read closure on the connection
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    /// Execute a closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before the first read, so the rows the closure
    /// inspects cannot change under it. Commits on `Ok`; any `Err` (or a
    /// panic) drops the transaction, which rolls everything back.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
    }

    /// Get database location
    pub fn location(&self) -> &DbLocation {
        &self.location
    }
}

/// Initialize database schema
fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            xp_points INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS disciplines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS modules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            discipline_id INTEGER NOT NULL REFERENCES disciplines(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_modules_discipline ON modules(discipline_id);

        CREATE TABLE IF NOT EXISTS lessons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_lessons_module ON lessons(module_id);

        CREATE TABLE IF NOT EXISTS lesson_blocks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
            order_in_lesson INTEGER NOT NULL DEFAULT 0,
            block_type TEXT NOT NULL,
            theory_text TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_lesson ON lesson_blocks(lesson_id);

        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_block_id INTEGER NOT NULL REFERENCES lesson_blocks(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            correct_answer_text TEXT,
            general_explanation TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_questions_block ON questions(lesson_block_id);

        CREATE TABLE IF NOT EXISTS question_options (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            is_correct BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_options_question ON question_options(question_id);

        CREATE TABLE IF NOT EXISTS user_lesson_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            lesson_id INTEGER NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
            attempts INTEGER NOT NULL DEFAULT 1,
            completed_at DATETIME,
            UNIQUE(user_id, lesson_id)
        );

        CREATE TABLE IF NOT EXISTS user_question_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            is_correct BOOLEAN NOT NULL DEFAULT 0,
            answered_at DATETIME NOT NULL,
            UNIQUE(user_id, question_id)
        );",
    )
}
