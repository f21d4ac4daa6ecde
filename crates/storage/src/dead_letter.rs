//! Dead-letter store for intake events that could not be turned into a
//! notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Pipeline stage at which an event was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStage {
    Intake,
    Conversion,
    Binding,
}

impl DeadLetterStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Conversion => "conversion",
            Self::Binding => "binding",
        }
    }

    fn parse(s: &str) -> StorageResult<Self> {
        match s {
            "intake" => Ok(Self::Intake),
            "conversion" => Ok(Self::Conversion),
            "binding" => Ok(Self::Binding),
            other => Err(StorageError::Corrupt(format!("unknown dead-letter stage '{}'", other))),
        }
    }
}

/// An abandoned event and the reason it was abandoned.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub source_path: String,
    pub stage: DeadLetterStage,
    pub reason: String,
    /// Set when the event got as far as a data object
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(source_path: impl Into<String>, stage: DeadLetterStage, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_path: source_path.into(),
            stage,
            reason: reason.into(),
            content_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        let id: String = row.try_get("id")?;
        let stage: String = row.try_get("stage")?;
        let created_at: i64 = row.try_get("created_at")?;

        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| StorageError::Corrupt(e.to_string()))?,
            source_path: row.try_get("source_path")?,
            stage: DeadLetterStage::parse(&stage)?,
            reason: row.try_get("reason")?,
            content_hash: row.try_get("content_hash")?,
            created_at: DateTime::from_timestamp_millis(created_at)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }
}

/// Destination for abandoned events.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> StorageResult<()>;

    /// Most recent letters first.
    async fn list(&self, limit: u32) -> StorageResult<Vec<DeadLetter>>;
}

/// SQLite-backed dead-letter sink.
#[derive(Clone)]
pub struct DeadLetterStore {
    pool: SqlitePool,
}

impl DeadLetterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> StorageResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterStore {
    async fn record(&self, letter: DeadLetter) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, source_path, stage, reason, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(letter.id.to_string())
        .bind(&letter.source_path)
        .bind(letter.stage.as_str())
        .bind(&letter.reason)
        .bind(&letter.content_hash)
        .bind(letter.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        warn!(
            source = %letter.source_path,
            stage = letter.stage.as_str(),
            reason = %letter.reason,
            "Event dead-lettered"
        );
        Ok(())
    }

    async fn list(&self, limit: u32) -> StorageResult<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_path, stage, reason, content_hash, created_at
            FROM dead_letters
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(DeadLetter::from_row).collect()
    }
}
