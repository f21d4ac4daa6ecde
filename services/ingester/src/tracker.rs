//! Per-event state machine and tracking of active and recent events.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Pipeline state of one intake event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Received,
    Converting,
    Converted,
    ConversionFailed,
    Bound,
    BindFailed,
    Composed,
    Enqueued,
}

impl EventState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventState::ConversionFailed | EventState::BindFailed | EventState::Enqueued
        )
    }

    /// Forward transitions, plus the rollback of an unfinished event to
    /// `Received`.
    pub fn can_transition_to(self, next: EventState) -> bool {
        use EventState::*;
        match (self, next) {
            (Received, Converting)
            | (Converting, Converted)
            | (Converting, ConversionFailed)
            | (Converted, Bound)
            | (Converted, BindFailed)
            | (Bound, Composed)
            | (Composed, Enqueued) => true,
            (from, Received) => !from.is_terminal() && from != Received,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid event transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: EventState,
    pub to: EventState,
}

/// An event currently in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveEvent {
    pub id: Uuid,
    pub source_path: String,
    pub started_at: DateTime<Utc>,
    pub state: EventState,
    /// Bind attempts made so far
    pub bind_attempts: u32,
}

/// A finished event.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedEvent {
    pub id: Uuid,
    pub source_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Final state; `RECEIVED` means the event was rolled back
    pub state: EventState,
    pub notification_id: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackerSnapshot {
    pub active: Vec<ActiveEvent>,
    pub recent: Vec<CompletedEvent>,
    pub total_completed: u64,
}

/// Tracks every event from receipt to a terminal state (or rollback).
pub struct EventTracker {
    active: Mutex<HashMap<Uuid, ActiveEvent>>,
    completed: Mutex<VecDeque<CompletedEvent>>,
    total_completed: Mutex<u64>,
    max_completed: usize,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventTracker {
    pub fn new(max_completed: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            total_completed: Mutex::new(0),
            max_completed,
        }
    }

    pub async fn start(&self, source_path: &str) -> Uuid {
        let id = Uuid::new_v4();
        let event = ActiveEvent {
            id,
            source_path: source_path.to_string(),
            started_at: Utc::now(),
            state: EventState::Received,
            bind_attempts: 0,
        };
        self.active.lock().await.insert(id, event);
        id
    }

    /// Move an active event to its next state.
    pub async fn advance(&self, id: Uuid, to: EventState) -> Result<(), InvalidTransition> {
        let mut active = self.active.lock().await;
        let Some(event) = active.get_mut(&id) else {
            return Err(InvalidTransition {
                from: EventState::Received,
                to,
            });
        };
        if !event.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: event.state,
                to,
            });
        }
        event.state = to;
        Ok(())
    }

    pub async fn record_bind_attempt(&self, id: Uuid) {
        if let Some(event) = self.active.lock().await.get_mut(&id) {
            event.bind_attempts += 1;
        }
    }

    pub async fn state(&self, id: Uuid) -> Option<EventState> {
        self.active.lock().await.get(&id).map(|e| e.state)
    }

    /// Retire an event in its current state.
    pub async fn finish(&self, id: Uuid, notification_id: Option<String>, error_message: Option<String>) {
        let Some(event) = self.active.lock().await.remove(&id) else {
            return;
        };
        let completed_at = Utc::now();
        let duration_ms = (completed_at - event.started_at).num_milliseconds().max(0) as u64;

        let mut completed = self.completed.lock().await;
        completed.push_front(CompletedEvent {
            id: event.id,
            source_path: event.source_path,
            started_at: event.started_at,
            completed_at,
            duration_ms,
            state: event.state,
            notification_id,
            error_message,
        });
        while completed.len() > self.max_completed {
            completed.pop_back();
        }
        *self.total_completed.lock().await += 1;
    }

    pub async fn snapshot(&self, recent: usize) -> TrackerSnapshot {
        let active = self.active.lock().await;
        let completed = self.completed.lock().await;
        let mut active: Vec<ActiveEvent> = active.values().cloned().collect();
        active.sort_by_key(|e| e.started_at);

        TrackerSnapshot {
            active,
            recent: completed.iter().take(recent).cloned().collect(),
            total_completed: *self.total_completed.lock().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventState::*;

    #[test]
    fn test_forward_path() {
        let path = [Received, Converting, Converted, Bound, Composed, Enqueued];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Converting.can_transition_to(ConversionFailed));
        assert!(Converted.can_transition_to(BindFailed));
    }

    #[test]
    fn test_no_reentry() {
        assert!(!Converted.can_transition_to(Converting));
        assert!(!Received.can_transition_to(Bound));
        assert!(!Enqueued.can_transition_to(Received));
        assert!(!ConversionFailed.can_transition_to(Received));
        assert!(!Received.can_transition_to(Received));
        assert!(Composed.can_transition_to(Received));
    }

    #[test]
    fn test_transition_table() {
        let all = [Received, Converting, Converted, ConversionFailed, Bound, BindFailed, Composed, Enqueued];
        let allowed = [
            (Received, Converting),
            (Converting, Converted),
            (Converting, ConversionFailed),
            (Converted, Bound),
            (Converted, BindFailed),
            (Bound, Composed),
            (Composed, Enqueued),
            (Converting, Received),
            (Converted, Received),
            (Bound, Received),
            (Composed, Received),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_state() {
        let tracker = EventTracker::default();
        let id = tracker.start("incoming/a.csv").await;
        tracker.advance(id, Converting).await.unwrap();
        tracker.advance(id, Converted).await.unwrap();

        let err = tracker.advance(id, Composed).await.unwrap_err();
        assert_eq!(err, InvalidTransition { from: Converted, to: Composed });
        assert_eq!(tracker.state(id).await, Some(Converted));

        tracker.advance(id, Bound).await.unwrap();
        tracker.advance(id, Received).await.unwrap();
        assert_eq!(tracker.state(id).await, Some(Received));

        tracker.advance(id, Converting).await.unwrap();
        tracker.advance(id, Converted).await.unwrap();
        tracker.advance(id, BindFailed).await.unwrap();
        assert!(tracker.advance(id, Received).await.is_err());
        assert_eq!(tracker.state(id).await, Some(BindFailed));

        assert!(tracker.advance(Uuid::new_v4(), Converting).await.is_err());
    }

    #[tokio::test]
    async fn test_tracker_lifecycle() {
        let tracker = EventTracker::new(2);
        let id = tracker.start("incoming/a.csv").await;
        tracker.advance(id, Converting).await.unwrap();
        assert!(tracker.advance(id, Composed).await.is_err());
        tracker.advance(id, ConversionFailed).await.unwrap();
        tracker.finish(id, None, Some("bad".into())).await;

        for _ in 0..3 {
            let id = tracker.start("incoming/b.csv").await;
            tracker.finish(id, None, None).await;
        }

        let snapshot = tracker.snapshot(10).await;
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.total_completed, 4);
    }
}
