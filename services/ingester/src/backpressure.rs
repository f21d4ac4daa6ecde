//! Intake admission control driven by outbox depth.
//!
//! Admission is suspended once the number of outstanding outbox entries
//! reaches the high watermark and resumes when it falls below the low
//! watermark. Nothing is dropped while suspended: files stay in the intake
//! directory until they are admitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use serde::Serialize;
use storage::{Outbox, StorageResult};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound between depth checks while suspended, in case a depth
/// notification is missed.
const RECHECK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    Open,
    Suspended,
}

pub struct AdmissionGate {
    outbox: Outbox,
    high_watermark: u64,
    low_watermark: u64,
    suspended: AtomicBool,
    depth_changed: Arc<Notify>,
}

impl AdmissionGate {
    pub fn new(outbox: Outbox, high_watermark: u64, low_watermark: u64, depth_changed: Arc<Notify>) -> Self {
        Self {
            outbox,
            high_watermark,
            // An empty outbox always resumes intake
            low_watermark: low_watermark.min(high_watermark.saturating_sub(1)).max(1),
            suspended: AtomicBool::new(false),
            depth_changed,
        }
    }

    pub fn state(&self) -> Admission {
        if self.suspended.load(Ordering::SeqCst) {
            Admission::Suspended
        } else {
            Admission::Open
        }
    }

    /// Apply the watermarks to an observed depth and return the new state.
    pub fn observe(&self, depth: u64) -> Admission {
        let suspended = self.suspended.load(Ordering::SeqCst);
        if !suspended && depth >= self.high_watermark {
            self.suspended.store(true, Ordering::SeqCst);
            gauge!("wis2_intake_suspended").set(1.0);
            warn!(depth, high_watermark = self.high_watermark, "Outbox full, suspending intake");
        } else if suspended && depth < self.low_watermark {
            self.suspended.store(false, Ordering::SeqCst);
            gauge!("wis2_intake_suspended").set(0.0);
            info!(depth, low_watermark = self.low_watermark, "Outbox drained, resuming intake");
        }
        self.state()
    }

    /// Wait until intake may admit another event.
    ///
    /// Returns `Ok(false)` if cancelled while waiting.
    pub async fn admit(&self, cancel: &CancellationToken) -> StorageResult<bool> {
        loop {
            // Register interest before reading the depth so a drain between
            // the two is not missed.
            let notified = self.depth_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.observe(self.outbox.depth().await?) == Admission::Open {
                return Ok(true);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = &mut notified => {}
                _ = tokio::time::sleep(RECHECK_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::Database;

    async fn gate(high: u64, low: u64) -> AdmissionGate {
        let db = Database::open_memory().await.unwrap();
        AdmissionGate::new(db.outbox(), high, low, Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn test_hysteresis() {
        let gate = gate(10, 5).await;
        assert_eq!(gate.observe(9), Admission::Open);
        assert_eq!(gate.observe(10), Admission::Suspended);
        // Between the watermarks the state holds
        assert_eq!(gate.observe(7), Admission::Suspended);
        assert_eq!(gate.observe(5), Admission::Suspended);
        assert_eq!(gate.observe(4), Admission::Open);
        assert_eq!(gate.observe(7), Admission::Open);
    }

    #[tokio::test]
    async fn test_zero_low_watermark_resumes_when_empty() {
        let gate = gate(1, 0).await;
        assert_eq!(gate.observe(1), Admission::Suspended);
        assert_eq!(gate.observe(0), Admission::Open);
    }

    #[tokio::test]
    async fn test_admit_when_empty() {
        let gate = gate(1, 0).await;
        assert!(gate.admit(&CancellationToken::new()).await.unwrap());
    }
}
