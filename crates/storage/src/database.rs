//! SQLite database shared by the outbox and the dead-letter store.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::dead_letter::DeadLetterStore;
use crate::error::StorageResult;
use crate::outbox::Outbox;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        topic TEXT NOT NULL,
        ordering_key TEXT NOT NULL,
        partition_id INTEGER NOT NULL,
        payload BLOB NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        next_retry_at INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending',
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_state ON outbox(state)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_key ON outbox(partition_id, ordering_key, state)",
    r#"
    CREATE TABLE IF NOT EXISTS dead_letters (
        id TEXT PRIMARY KEY,
        source_path TEXT NOT NULL,
        stage TEXT NOT NULL,
        reason TEXT NOT NULL,
        content_hash TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_created ON dead_letters(created_at)",
];

/// Handle to the pipeline database.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create the database at the given path.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        info!(path = %path.display(), "Opened pipeline database");

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    ///
    /// A single connection that never expires, so the data lives as long as
    /// the pool.
    pub async fn open_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.pool.clone())
    }

    pub fn dead_letters(&self) -> DeadLetterStore {
        DeadLetterStore::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn migrate(pool: &SqlitePool) -> StorageResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
