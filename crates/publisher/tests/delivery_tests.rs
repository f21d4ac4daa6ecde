//! Delivery behaviour against scripted brokers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use publisher::{
    Clock, ManualClock, Publisher, PublisherSettings, RetryPolicyBuilder, SystemClock,
};
use storage::{Database, OutboxState};
use test_utils::fixtures::{notification, DATASET_ID};
use test_utils::{RecordingBroker, Reply, ScriptedBroker};
use tokio_util::sync::CancellationToken;

fn settings(max_attempts: u32) -> PublisherSettings {
    PublisherSettings {
        partitions: 1,
        publish_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
        retry: RetryPolicyBuilder::new(2, Duration::from_secs(1))
            .maximum_interval(Duration::from_secs(60))
            .max_attempts(max_attempts)
            .jitter(0.0),
        ..PublisherSettings::default()
    }
}

async fn publisher_with(
    broker: Arc<dyn publisher::Broker>,
    clock: Arc<dyn Clock>,
    settings: PublisherSettings,
) -> Publisher {
    let db = Database::open_memory().await.unwrap();
    Publisher::new(db.outbox(), broker, clock, settings)
}

#[tokio::test]
async fn test_two_nacks_then_ack_ends_acked() {
    let broker = Arc::new(ScriptedBroker::new([Reply::Nack, Reply::Nack]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock.clone(), settings(5)).await;

    let entry = publisher
        .enqueue(&notification("hash-a", DATASET_ID, "k"))
        .await
        .unwrap();
    assert_eq!(entry.state, OutboxState::Pending);

    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.retrying, 1);

    // Still backing off
    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.attempted(), 0);

    clock.advance(chrono::Duration::seconds(1));
    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.retrying, 1);

    clock.advance(chrono::Duration::seconds(2));
    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.acked, 1);

    assert_eq!(broker.attempts().len(), 3);
    let delivered = broker.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].notification_id().as_deref(), Some("hash-a"));

    let entry = publisher.outbox().get("hash-a").await.unwrap().unwrap();
    assert_eq!(entry.state, OutboxState::Acked);
    assert_eq!(entry.attempt_count, 3);

    // Nothing left to send
    clock.advance(chrono::Duration::seconds(60));
    assert_eq!(publisher.deliver_due(0).await.unwrap().attempted(), 0);
}

#[tokio::test]
async fn test_attempts_exhausted_goes_dead() {
    let broker = Arc::new(ScriptedBroker::new([Reply::Nack, Reply::Nack, Reply::Nack]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock.clone(), settings(3)).await;

    publisher
        .enqueue(&notification("hash-a", DATASET_ID, "k"))
        .await
        .unwrap();

    for _ in 0..3 {
        publisher.deliver_due(0).await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
    }

    let dead = publisher.outbox().list(OutboxState::Dead, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].last_error.as_deref().unwrap().contains("3 attempts"));
    assert!(broker.delivered().is_empty());
}

#[tokio::test]
async fn test_rejected_goes_dead_immediately() {
    let broker = Arc::new(ScriptedBroker::new([Reply::Reject]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock, settings(5)).await;

    publisher
        .enqueue(&notification("hash-a", DATASET_ID, "k"))
        .await
        .unwrap();
    let report = publisher.deliver_due(0).await.unwrap();

    assert_eq!(report.dead, 1);
    assert_eq!(broker.attempts().len(), 1);
    let entry = publisher.outbox().get("hash-a").await.unwrap().unwrap();
    assert_eq!(entry.state, OutboxState::Dead);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let broker = Arc::new(ScriptedBroker::new([Reply::Hang]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock.clone(), settings(5)).await;

    publisher
        .enqueue(&notification("hash-a", DATASET_ID, "k"))
        .await
        .unwrap();
    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.retrying, 1);

    let entry = publisher.outbox().get("hash-a").await.unwrap().unwrap();
    assert_eq!(entry.state, OutboxState::Pending);
    assert!(entry.last_error.unwrap().contains("not confirmed"));

    clock.advance(chrono::Duration::seconds(1));
    assert_eq!(publisher.deliver_due(0).await.unwrap().acked, 1);
}

#[tokio::test]
async fn test_reenqueue_after_ack_publishes_nothing() {
    let broker = Arc::new(RecordingBroker::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock, settings(5)).await;

    let n = notification("hash-a", DATASET_ID, "k");
    publisher.enqueue(&n).await.unwrap();
    publisher.enqueue(&n).await.unwrap();
    publisher.deliver_due(0).await.unwrap();

    let again = publisher.enqueue(&n).await.unwrap();
    assert_eq!(again.state, OutboxState::Acked);
    publisher.deliver_due(0).await.unwrap();

    assert_eq!(broker.count(), 1);
}

#[tokio::test]
async fn test_per_key_order_under_concurrency() {
    let broker = Arc::new(RecordingBroker::with_delay(Duration::from_millis(15)));
    let publisher = Arc::new(
        publisher_with(broker.clone(), Arc::new(SystemClock), settings(5)).await,
    );

    let order = [("a1", "a"), ("b1", "b"), ("a2", "a"), ("c1", "c"), ("b2", "b"), ("a3", "a")];
    for (id, key) in order {
        publisher
            .enqueue(&notification(id, DATASET_ID, key))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let handles = publisher.spawn_loops(cancel.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.count() < order.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all notifications delivered");
    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let seen: Vec<String> = broker
        .published()
        .iter()
        .filter_map(|m| m.notification_id())
        .collect();
    let position = |id: &str| seen.iter().position(|s| s == id).unwrap();

    assert!(position("a1") < position("a2"));
    assert!(position("a2") < position("a3"));
    assert!(position("b1") < position("b2"));
    assert_eq!(seen.len(), order.len());
}

#[tokio::test]
async fn test_retry_scheduled_from_clock() {
    let broker = Arc::new(ScriptedBroker::new([Reply::Nack]));
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));
    let publisher = publisher_with(broker, clock, settings(5)).await;

    publisher
        .enqueue(&notification("hash-a", DATASET_ID, "k"))
        .await
        .unwrap();
    publisher.deliver_due(0).await.unwrap();

    let entry = publisher.outbox().get("hash-a").await.unwrap().unwrap();
    assert_eq!(
        entry.next_retry_at.timestamp_millis(),
        (start + chrono::Duration::seconds(1)).timestamp_millis()
    );
}

#[tokio::test]
async fn test_later_object_waits_behind_backing_off_head() {
    // A single-station object followed by a multi-station one for the same
    // dataset: both carry the dataset key, so the second cannot overtake.
    let broker = Arc::new(ScriptedBroker::new([Reply::Nack]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let publisher = publisher_with(broker.clone(), clock.clone(), settings(5)).await;

    publisher
        .enqueue(&notification("single", DATASET_ID, DATASET_ID))
        .await
        .unwrap();
    publisher
        .enqueue(&notification("multi", DATASET_ID, DATASET_ID))
        .await
        .unwrap();

    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.retrying, 1);
    assert_eq!(publisher.deliver_due(0).await.unwrap().attempted(), 0);
    assert!(broker.delivered().is_empty());

    clock.advance(chrono::Duration::seconds(1));
    while publisher.deliver_due(0).await.unwrap().attempted() > 0 {}

    let delivered: Vec<String> = broker
        .delivered()
        .iter()
        .filter_map(|m| m.notification_id())
        .collect();
    assert_eq!(delivered, vec!["single".to_string(), "multi".to_string()]);
}
