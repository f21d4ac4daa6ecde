//! Outbox delivery loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use storage::{Outbox, OutboxEntry, StorageResult};
use wis2_common::Notification;

use crate::broker::Broker;
use crate::clock::Clock;
use crate::retry::{RetryPolicy, RetryPolicyBuilder};

/// Delivery tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Number of delivery loops; keys are hashed onto them by dataset
    pub partitions: u32,
    /// Keys attempted concurrently within one pass of a loop
    pub max_concurrency: usize,
    /// Entries fetched per pass
    pub batch_size: u32,
    #[serde(rename = "publish_timeout_ms", with = "millis")]
    pub publish_timeout: Duration,
    /// Upper bound on how long an idle loop sleeps before looking again
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    pub retry: RetryPolicyBuilder,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            partitions: 4,
            max_concurrency: 8,
            batch_size: 64,
            publish_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicyBuilder::default(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// What happened to one entry during a delivery pass.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Acked,
    Retrying { attempt: u32, next_retry_at: DateTime<Utc> },
    Dead { reason: String },
    /// Another loop or the operator moved the entry first
    Skipped,
}

/// Tally of one delivery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub acked: usize,
    pub retrying: usize,
    pub dead: usize,
    pub skipped: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.acked + self.retrying + self.dead
    }

    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Acked => self.acked += 1,
            DeliveryOutcome::Retrying { .. } => self.retrying += 1,
            DeliveryOutcome::Dead { .. } => self.dead += 1,
            DeliveryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Stable partition of a dataset id (FNV-1a), so entries keep their loop
/// across restarts.
pub fn partition_for(dataset_id: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in dataset_id.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}

/// Owns delivery of everything in the outbox.
pub struct Publisher {
    outbox: Outbox,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    settings: PublisherSettings,
    policy: RetryPolicy,
    wakers: Vec<Notify>,
    depth_changed: Arc<Notify>,
}

impl Publisher {
    pub fn new(
        outbox: Outbox,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        settings: PublisherSettings,
    ) -> Self {
        let partitions = settings.partitions.max(1);
        let policy = settings.retry.provide();
        Self {
            outbox,
            broker,
            clock,
            wakers: (0..partitions).map(|_| Notify::new()).collect(),
            depth_changed: Arc::new(Notify::new()),
            settings: PublisherSettings {
                partitions,
                ..settings
            },
            policy,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn partitions(&self) -> u32 {
        self.settings.partitions
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Signalled whenever an entry leaves the outbox's outstanding set.
    pub fn depth_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.depth_changed)
    }

    /// Durably record a notification for delivery.
    ///
    /// Returns once the entry is persisted; re-enqueueing an id already in
    /// the outbox returns the existing entry.
    #[instrument(skip(self, notification), fields(id = %notification.id, topic = %notification.topic))]
    pub async fn enqueue(&self, notification: &Notification) -> StorageResult<OutboxEntry> {
        let partition = partition_for(&notification.dataset_id, self.settings.partitions);
        let enqueued = self
            .outbox
            .enqueue(notification, partition, self.clock.now())
            .await?;

        if enqueued.created {
            if let Some(waker) = self.wakers.get(partition as usize) {
                waker.notify_one();
            }
            self.record_depth().await;
        }
        Ok(enqueued.entry)
    }

    /// Make a requeued entry visible to its loop straight away.
    pub fn wake(&self, partition: u32) {
        if let Some(waker) = self.wakers.get(partition as usize) {
            waker.notify_one();
        }
    }

    /// One delivery pass over a partition.
    pub async fn deliver_due(&self, partition: u32) -> StorageResult<DeliveryReport> {
        let heads = self
            .outbox
            .due_heads(partition, self.clock.now(), self.settings.batch_size)
            .await?;

        let mut report = DeliveryReport::default();
        if heads.is_empty() {
            return Ok(report);
        }

        // Heads belong to distinct keys, so they may go out concurrently
        let outcomes: Vec<StorageResult<DeliveryOutcome>> = stream::iter(heads)
            .map(|entry| self.deliver_one(entry))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(&outcome?);
        }

        if report.acked + report.dead > 0 {
            self.depth_changed.notify_waiters();
            self.record_depth().await;
        }
        Ok(report)
    }

    async fn deliver_one(&self, entry: OutboxEntry) -> StorageResult<DeliveryOutcome> {
        if !self.outbox.mark_in_flight(&entry.id, self.clock.now()).await? {
            return Ok(DeliveryOutcome::Skipped);
        }
        let attempt = entry.attempt_count + 1;
        counter!("wis2_publish_attempts_total").increment(1);

        let result = self
            .broker
            .publish_within(&entry.topic, &entry.payload, self.settings.publish_timeout)
            .await;

        let now = self.clock.now();
        match result {
            Ok(()) => {
                self.outbox.mark_acked(&entry.id, now).await?;
                counter!("wis2_notifications_published_total").increment(1);
                info!(id = %entry.id, topic = %entry.topic, attempt, "Notification published");
                Ok(DeliveryOutcome::Acked)
            }
            Err(e) if !e.is_retryable() => self.bury(&entry, e.to_string(), now).await,
            Err(e) if !self.policy.should_retry(attempt) => {
                let reason = format!("gave up after {} attempts: {}", attempt, e);
                self.bury(&entry, reason, now).await
            }
            Err(e) => {
                let backoff = self.policy.jittered_interval(attempt, &mut rand::thread_rng());
                let next_retry_at = now
                    + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(1));
                self.outbox
                    .schedule_retry(&entry.id, next_retry_at, &e.to_string(), now)
                    .await?;
                warn!(
                    id = %entry.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Publish failed, will retry"
                );
                Ok(DeliveryOutcome::Retrying {
                    attempt,
                    next_retry_at,
                })
            }
        }
    }

    async fn bury(
        &self,
        entry: &OutboxEntry,
        reason: String,
        now: DateTime<Utc>,
    ) -> StorageResult<DeliveryOutcome> {
        self.outbox.mark_dead(&entry.id, &reason, now).await?;
        counter!("wis2_outbox_dead_total").increment(1);
        Ok(DeliveryOutcome::Dead { reason })
    }

    async fn record_depth(&self) {
        match self.outbox.depth().await {
            Ok(depth) => gauge!("wis2_outbox_depth").set(depth as f64),
            Err(e) => debug!(error = %e, "Could not read outbox depth"),
        }
    }

    /// Delivery loop for one partition, until cancelled.
    ///
    /// An entry interrupted by cancellation stays IN_FLIGHT and is reverted
    /// to PENDING when the outbox is next opened.
    #[instrument(skip(self, cancel), fields(broker = self.broker.name()))]
    pub async fn run(&self, partition: u32, cancel: CancellationToken) {
        info!(partition, "Delivery loop started");
        let waker = match self.wakers.get(partition as usize) {
            Some(waker) => waker,
            None => {
                error!(partition, partitions = self.settings.partitions, "No such partition");
                return;
            }
        };

        loop {
            let pass = tokio::select! {
                _ = cancel.cancelled() => break,
                pass = self.deliver_due(partition) => pass,
            };

            let idle = match pass {
                Ok(report) if report.attempted() > 0 => {
                    debug!(partition, ?report, "Delivery pass");
                    continue;
                }
                Ok(_) => self.idle_for(partition).await,
                Err(e) => {
                    error!(partition, error = %e, "Outbox unavailable");
                    self.settings.poll_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = waker.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        info!(partition, "Delivery loop stopped");
    }

    /// Sleep until the next scheduled retry, bounded by the poll interval.
    async fn idle_for(&self, partition: u32) -> Duration {
        let poll = self.settings.poll_interval;
        match self.outbox.next_due_at(partition).await {
            Ok(Some(due)) => (due - self.clock.now())
                .to_std()
                .map(|wait| wait.min(poll))
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_millis(10)),
            _ => poll,
        }
    }

    /// Start one delivery loop per partition.
    pub fn spawn_loops(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.settings.partitions)
            .map(|partition| {
                let publisher = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { publisher.run(partition, cancel).await })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable() {
        let a = partition_for("mw-mw_met_centre.data.core.weather.surface-based-observations.synop", 4);
        let b = partition_for("mw-mw_met_centre.data.core.weather.surface-based-observations.synop", 4);
        assert_eq!(a, b);
        assert!(a < 4);
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_report_counts() {
        let mut report = DeliveryReport::default();
        report.record(&DeliveryOutcome::Acked);
        report.record(&DeliveryOutcome::Skipped);
        report.record(&DeliveryOutcome::Dead {
            reason: "x".to_string(),
        });
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.skipped, 1);
    }
}
