//! Durable notification outbox.
//!
//! Every composed notification is persisted here before any delivery is
//! attempted. Each state transition is a single guarded `UPDATE`, so the
//! orchestrator and concurrent delivery loops never observe a torn entry.
//!
//! ```text
//! PENDING --mark_in_flight--> IN_FLIGHT --mark_acked--> ACKED
//!    ^                            |
//!    +------schedule_retry--------+--mark_dead--> DEAD --requeue_dead--> PENDING
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use wis2_common::Notification;

use crate::error::{StorageError, StorageResult};

const COLUMNS: &str = "seq, id, topic, ordering_key, partition_id, payload, attempt_count, \
                       next_retry_at, state, last_error, created_at, updated_at";

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxState {
    Pending,
    InFlight,
    Acked,
    Dead,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Acked => "acked",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> StorageResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "acked" => Ok(Self::Acked),
            "dead" => Ok(Self::Dead),
            other => Err(StorageError::Corrupt(format!("unknown outbox state '{}'", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::Dead)
    }
}

/// A persisted notification and its delivery bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxEntry {
    /// Enqueue order, used for FIFO delivery per ordering key
    pub seq: i64,
    /// Notification id (content hash)
    pub id: String,
    pub topic: String,
    pub ordering_key: String,
    pub partition: u32,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub attempt_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub state: OutboxState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    fn from_row(row: &SqliteRow) -> StorageResult<Self> {
        let state: String = row.try_get("state")?;
        let partition: i64 = row.try_get("partition_id")?;
        let attempt_count: i64 = row.try_get("attempt_count")?;

        Ok(Self {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            ordering_key: row.try_get("ordering_key")?,
            partition: partition as u32,
            payload: row.try_get("payload")?,
            attempt_count: attempt_count as u32,
            next_retry_at: from_millis(row.try_get("next_retry_at")?),
            state: OutboxState::parse(&state)?,
            last_error: row.try_get("last_error")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub entry: OutboxEntry,
    /// False when an entry with the same id already existed
    pub created: bool,
}

/// Number of entries per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub acked: u64,
    pub dead: u64,
}

impl OutboxCounts {
    /// Entries not yet in a terminal state.
    pub fn depth(&self) -> u64 {
        self.pending + self.in_flight
    }
}

/// SQLite-backed outbox.
#[derive(Clone)]
pub struct Outbox {
    pool: SqlitePool,
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Outbox {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a notification for delivery.
    ///
    /// Idempotent on the notification id: enqueueing identical content again
    /// returns the existing entry untouched.
    pub async fn enqueue(
        &self,
        notification: &Notification,
        partition: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<Enqueued> {
        let payload = notification.payload()?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO outbox
                (id, topic, ordering_key, partition_id, payload, attempt_count,
                 next_retry_at, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.topic)
        .bind(&notification.ordering_key)
        .bind(partition as i64)
        .bind(&payload)
        .bind(millis(now))
        .bind(millis(now))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        let entry = self
            .get(&notification.id)
            .await?
            .ok_or_else(|| StorageError::NotFound(notification.id.clone()))?;

        if created {
            debug!(id = %entry.id, topic = %entry.topic, seq = entry.seq, "Enqueued notification");
        } else {
            info!(id = %entry.id, state = entry.state.as_str(), "Notification already in outbox");
        }

        Ok(Enqueued { entry, created })
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<OutboxEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM outbox WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(OutboxEntry::from_row).transpose()
    }

    /// Entries ready for delivery in one partition.
    ///
    /// Only the oldest non-terminal entry of each ordering key is eligible,
    /// and only when it is pending and its retry time has passed. A key whose
    /// head is in flight or backing off yields nothing, which keeps delivery
    /// FIFO per key.
    pub async fn due_heads(
        &self,
        partition: u32,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM outbox
            WHERE seq IN (
                SELECT MIN(seq) FROM outbox
                WHERE partition_id = ? AND state IN ('pending', 'in_flight')
                GROUP BY ordering_key
            )
            AND state = 'pending' AND next_retry_at <= ?
            ORDER BY seq
            LIMIT ?
            "#,
            COLUMNS
        ))
        .bind(partition as i64)
        .bind(millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(OutboxEntry::from_row).collect()
    }

    /// Earliest retry time among the pending key heads of a partition.
    ///
    /// Entries queued behind a head are ignored; their own retry time says
    /// nothing about when the key can move again.
    pub async fn next_due_at(&self, partition: u32) -> StorageResult<Option<DateTime<Utc>>> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MIN(next_retry_at) FROM outbox
            WHERE seq IN (
                SELECT MIN(seq) FROM outbox
                WHERE partition_id = ? AND state IN ('pending', 'in_flight')
                GROUP BY ordering_key
            )
            AND state = 'pending'
            "#,
        )
        .bind(partition as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(next.map(from_millis))
    }

    /// PENDING -> IN_FLIGHT, counting the attempt.
    ///
    /// Returns false if the entry was not pending.
    pub async fn mark_in_flight(&self, id: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'in_flight', attempt_count = attempt_count + 1, updated_at = ?
            WHERE id = ? AND state = 'pending'
            "#,
        )
        .bind(millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// IN_FLIGHT -> ACKED.
    pub async fn mark_acked(&self, id: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'acked', last_error = NULL, updated_at = ?
            WHERE id = ? AND state = 'in_flight'
            "#,
        )
        .bind(millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// IN_FLIGHT -> PENDING with a later retry time.
    pub async fn schedule_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'pending', next_retry_at = ?, last_error = ?, updated_at = ?
            WHERE id = ? AND state = 'in_flight'
            "#,
        )
        .bind(millis(next_retry_at))
        .bind(error)
        .bind(millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Any non-terminal state -> DEAD.
    pub async fn mark_dead(&self, id: &str, error: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'dead', last_error = ?, updated_at = ?
            WHERE id = ? AND state IN ('pending', 'in_flight')
            "#,
        )
        .bind(error)
        .bind(millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            warn!(id = %id, error = %error, "Outbox entry is dead");
        }
        Ok(result.rows_affected() == 1)
    }

    /// DEAD -> PENDING with a fresh attempt budget (operator action).
    pub async fn requeue_dead(&self, id: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'pending', attempt_count = 0, next_retry_at = ?, updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(millis(now))
        .bind(millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(id = %id, "Requeued dead outbox entry");
        }
        Ok(result.rows_affected() == 1)
    }

    /// Revert entries left IN_FLIGHT by a crash. The broker may or may not
    /// have received them; consumers dedup on the notification id.
    pub async fn recover_in_flight(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE outbox SET state = 'pending', next_retry_at = ?, updated_at = ? WHERE state = 'in_flight'",
        )
        .bind(millis(now))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(count = recovered, "Recovered in-flight outbox entries");
        }
        Ok(recovered)
    }

    /// Delete ACKED entries last updated before `older_than`.
    pub async fn purge_acked(&self, older_than: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM outbox WHERE state = 'acked' AND updated_at < ?")
            .bind(millis(older_than))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Entries not yet acked or dead.
    pub async fn depth(&self) -> StorageResult<u64> {
        let depth: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox WHERE state IN ('pending', 'in_flight')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(depth as u64)
    }

    pub async fn counts(&self) -> StorageResult<OutboxCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM outbox GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = OutboxCounts::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            match OutboxState::parse(&state)? {
                OutboxState::Pending => counts.pending = n as u64,
                OutboxState::InFlight => counts.in_flight = n as u64,
                OutboxState::Acked => counts.acked = n as u64,
                OutboxState::Dead => counts.dead = n as u64,
            }
        }
        Ok(counts)
    }

    /// Entries in a given state, oldest first.
    pub async fn list(&self, state: OutboxState, limit: u32) -> StorageResult<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM outbox WHERE state = ? ORDER BY seq LIMIT ?",
            COLUMNS
        ))
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(OutboxEntry::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;
    use wis2_common::{
        notification::{MessageProperties, WisNotificationMessage},
        Integrity, TemporalExtent,
    };

    fn notification(id: &str, key: &str) -> Notification {
        let now = Utc::now();
        let integrity = Integrity {
            method: "sha512".to_string(),
            value: "abc".to_string(),
        };
        Notification {
            id: id.to_string(),
            topic: "origin/a/wis2/test/data".to_string(),
            dataset_id: "test.data".to_string(),
            canonical_url: format!("http://localhost/data/{}.geojson", id),
            geometry: None,
            temporal_extent: TemporalExtent::new(now, now),
            integrity: integrity.clone(),
            published_at: now,
            ordering_key: key.to_string(),
            message: WisNotificationMessage {
                id: id.to_string(),
                kind: "Feature".to_string(),
                version: "v04".to_string(),
                geometry: None,
                properties: MessageProperties {
                    data_id: format!("test/data/{}", id),
                    datetime: None,
                    start_datetime: None,
                    end_datetime: None,
                    pubtime: "2024-01-01T00:00:00Z".to_string(),
                    integrity,
                    wigos_station_identifier: None,
                    content: None,
                },
                links: Vec::new(),
            },
        }
    }

    async fn outbox() -> Outbox {
        Database::open_memory().await.unwrap().outbox()
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let outbox = outbox().await;
        let now = Utc::now();

        let first = outbox.enqueue(&notification("a", "k"), 0, now).await.unwrap();
        let second = outbox.enqueue(&notification("a", "k"), 0, now).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entry.seq, second.entry.seq);
        assert_eq!(outbox.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_due_heads_only_returns_key_heads() {
        let outbox = outbox().await;
        let now = Utc::now();

        outbox.enqueue(&notification("a1", "a"), 0, now).await.unwrap();
        outbox.enqueue(&notification("a2", "a"), 0, now).await.unwrap();
        outbox.enqueue(&notification("b1", "b"), 0, now).await.unwrap();
        outbox.enqueue(&notification("c1", "c"), 1, now).await.unwrap();

        let heads = outbox.due_heads(0, now, 10).await.unwrap();
        let ids: Vec<_> = heads.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1"]);

        // An in-flight head blocks its key
        assert!(outbox.mark_in_flight("a1", now).await.unwrap());
        let heads = outbox.due_heads(0, now, 10).await.unwrap();
        let ids: Vec<_> = heads.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b1"]);

        assert!(outbox.mark_acked("a1", now).await.unwrap());
        let heads = outbox.due_heads(0, now, 10).await.unwrap();
        let ids: Vec<_> = heads.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "b1"]);
    }

    #[tokio::test]
    async fn test_backoff_holds_key() {
        let outbox = outbox().await;
        let now = Utc::now();

        outbox.enqueue(&notification("a1", "a"), 0, now).await.unwrap();
        outbox.enqueue(&notification("a2", "a"), 0, now).await.unwrap();

        outbox.mark_in_flight("a1", now).await.unwrap();
        outbox
            .schedule_retry("a1", now + Duration::seconds(30), "nack", now)
            .await
            .unwrap();

        assert!(outbox.due_heads(0, now, 10).await.unwrap().is_empty());
        let later = outbox.due_heads(0, now + Duration::seconds(31), 10).await.unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].id, "a1");
        assert_eq!(later[0].attempt_count, 1);
        assert_eq!(later[0].last_error.as_deref(), Some("nack"));
        assert_eq!(
            outbox.next_due_at(0).await.unwrap().map(|t| t.timestamp_millis()),
            Some((now + Duration::seconds(30)).timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_next_due_ignores_entries_behind_head() {
        let outbox = outbox().await;
        let now = Utc::now();

        outbox.enqueue(&notification("a1", "a"), 0, now).await.unwrap();
        outbox.enqueue(&notification("a2", "a"), 0, now).await.unwrap();

        // a2 is pending and due, but its key is blocked by the in-flight head
        outbox.mark_in_flight("a1", now).await.unwrap();
        assert_eq!(outbox.next_due_at(0).await.unwrap(), None);

        outbox
            .schedule_retry("a1", now + Duration::seconds(30), "nack", now)
            .await
            .unwrap();
        assert_eq!(
            outbox.next_due_at(0).await.unwrap().map(|t| t.timestamp_millis()),
            Some((now + Duration::seconds(30)).timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_transitions_are_guarded() {
        let outbox = outbox().await;
        let now = Utc::now();
        outbox.enqueue(&notification("a", "k"), 0, now).await.unwrap();

        // Cannot ack what is not in flight
        assert!(!outbox.mark_acked("a", now).await.unwrap());
        assert!(outbox.mark_in_flight("a", now).await.unwrap());
        assert!(!outbox.mark_in_flight("a", now).await.unwrap());
        assert!(outbox.mark_acked("a", now).await.unwrap());
        assert!(!outbox.mark_dead("a", "late", now).await.unwrap());

        let entry = outbox.get("a").await.unwrap().unwrap();
        assert_eq!(entry.state, OutboxState::Acked);
    }

    #[tokio::test]
    async fn test_dead_and_requeue() {
        let outbox = outbox().await;
        let now = Utc::now();
        outbox.enqueue(&notification("a", "k"), 0, now).await.unwrap();
        outbox.mark_in_flight("a", now).await.unwrap();
        outbox.mark_dead("a", "rejected", now).await.unwrap();

        let dead = outbox.list(OutboxState::Dead, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(outbox.depth().await.unwrap(), 0);

        assert!(outbox.requeue_dead("a", now).await.unwrap());
        let entry = outbox.get("a").await.unwrap().unwrap();
        assert_eq!(entry.state, OutboxState::Pending);
        assert_eq!(entry.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_recover_and_purge() {
        let outbox = outbox().await;
        let now = Utc::now();
        outbox.enqueue(&notification("a", "k"), 0, now).await.unwrap();
        outbox.enqueue(&notification("b", "j"), 0, now).await.unwrap();
        outbox.mark_in_flight("a", now).await.unwrap();
        outbox.mark_in_flight("b", now).await.unwrap();
        outbox.mark_acked("b", now).await.unwrap();

        assert_eq!(outbox.recover_in_flight(now).await.unwrap(), 1);
        let counts = outbox.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.acked, 1);

        let purged = outbox.purge_acked(now + Duration::seconds(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(outbox.get("b").await.unwrap().is_none());
    }
}
