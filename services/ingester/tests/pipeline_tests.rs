//! End-to-end tests: intake directory to broker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ingester::backpressure::{Admission, AdmissionGate};
use ingester::config::IngesterConfig;
use ingester::tracker::EventState;
use ingester::IngesterService;
use publisher::{Broker, Publisher, PublisherSettings, SystemClock};
use storage::{Database, DeadLetterStage, FeatureStoreConfig, OutboxState};
use test_utils::fixtures::{self, DATASET_ID, DATASET_TOPIC, STATION_ID};
use test_utils::{synop_message, temp_test_dir, write_file, RecordingBroker};
use tokio_util::sync::CancellationToken;

const DRAIN: Duration = Duration::from_secs(10);

fn node_config(root: &Path) -> IngesterConfig {
    let registry = write_file(root, "config/stations.csv", fixtures::stations_csv());
    let mappings = write_file(root, "config/mappings.yaml", fixtures::MAPPINGS_YAML);

    let mut config = IngesterConfig::default();
    config.intake.watch_dir = root.join("incoming");
    config.intake.failed_dir = root.join("failed");
    config.intake.poll_interval_ms = 20;
    config.mappings.csv = Some(mappings);
    config.registry.path = registry;
    config.outbox.path = root.join("data/node.db");
    config.features.store = FeatureStoreConfig::Local {
        root: root.join("features"),
    };
    config.pipeline.bind_attempts = 2;
    config.pipeline.bind_retry_delay_ms = 10;
    config.publisher.delivery.poll_interval = Duration::from_millis(20);
    config
}

async fn build(config: &IngesterConfig, broker: Arc<dyn Broker>) -> IngesterService {
    IngesterService::build(config, broker, Arc::new(SystemClock))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_csv_file_is_published_once() {
    let dir = temp_test_dir();
    let config = node_config(dir.path());
    let broker = Arc::new(RecordingBroker::new());
    let service = build(&config, broker.clone()).await;

    let file = write_file(dir.path(), "incoming/chidoole.csv", fixtures::SINGLE_ROW_CSV);
    service.run(CancellationToken::new(), true, DRAIN).await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, DATASET_TOPIC);
    assert!(!file.exists(), "processed intake file should be removed");

    let message: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(message["properties"]["wigos_station_identifier"], STATION_ID);
    assert_eq!(message["geometry"]["type"], "Point");

    // The canonical object was written before the notification went out
    let key = message["properties"]["data_id"].as_str().unwrap();
    assert!(key.starts_with(&DATASET_ID.replace('.', "/")));
    let stored = walkdir::WalkDir::new(dir.path().join("features"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(stored, 1);

    // Dropping identical content again does not publish twice
    write_file(dir.path(), "incoming/chidoole-again.csv", fixtures::SINGLE_ROW_CSV);
    service.run(CancellationToken::new(), true, DRAIN).await.unwrap();
    assert_eq!(broker.count(), 1);

    let counts = service.publisher.outbox().counts().await.unwrap();
    assert_eq!(counts.acked, 1);
    assert_eq!(counts.depth(), 0);
}

#[tokio::test]
async fn test_malformed_bufr_is_dead_lettered_without_blocking() {
    let dir = temp_test_dir();
    let config = node_config(dir.path());
    let broker = Arc::new(RecordingBroker::new());
    let service = build(&config, broker.clone()).await;

    let mut truncated = synop_message("AWSCHIDOOLE", -13.97, 33.78, 298.0);
    truncated.truncate(30);
    write_file(dir.path(), "incoming/synop/broken.bufr", &truncated);
    write_file(dir.path(), "incoming/good.csv", fixtures::SINGLE_ROW_CSV);

    service.run(CancellationToken::new(), true, DRAIN).await.unwrap();

    assert_eq!(broker.count(), 1);
    assert!(dir.path().join("failed/synop/broken.bufr").exists());
    assert!(!dir.path().join("incoming/synop/broken.bufr").exists());

    let letters = service.dead_letters.list(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].stage, DeadLetterStage::Conversion);
    assert!(letters[0].source_path.ends_with("broken.bufr"));

    let snapshot = service.tracker.snapshot(10).await;
    assert_eq!(snapshot.total_completed, 2);
    assert!(snapshot
        .recent
        .iter()
        .any(|e| e.state == EventState::ConversionFailed));
}

#[tokio::test]
async fn test_unknown_station_fails_binding_after_retries() {
    let dir = temp_test_dir();
    let config = node_config(dir.path());
    let broker = Arc::new(RecordingBroker::new());
    let service = build(&config, broker.clone()).await;

    write_file(
        dir.path(),
        "incoming/stranger.csv",
        "station,time,air_temperature\n0-454-2-NOWHERE,2022-01-12T13:55:00Z,20.0\n",
    );
    service.run(CancellationToken::new(), true, DRAIN).await.unwrap();

    assert_eq!(broker.count(), 0);
    assert!(dir.path().join("failed/stranger.csv").exists());

    let letters = service.dead_letters.list(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].stage, DeadLetterStage::Binding);
    assert!(letters[0].content_hash.is_some());

    let snapshot = service.tracker.snapshot(1).await;
    assert_eq!(snapshot.recent[0].state, EventState::BindFailed);
}

#[tokio::test]
async fn test_unsupported_file_is_dead_lettered_at_intake() {
    let dir = temp_test_dir();
    let mut config = node_config(dir.path());
    config.intake.formats = vec![wis2_common::DataFormat::Bufr];
    let service = build(&config, Arc::new(RecordingBroker::new())).await;

    write_file(dir.path(), "incoming/notes.txt", "hello");
    write_file(dir.path(), "incoming/obs.csv", fixtures::SINGLE_ROW_CSV);
    service.run(CancellationToken::new(), true, DRAIN).await.unwrap();

    let letters = service.dead_letters.list(10).await.unwrap();
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().all(|l| l.stage == DeadLetterStage::Intake));
}

#[tokio::test]
async fn test_cancelled_node_leaves_files_for_next_start() {
    let dir = temp_test_dir();
    let config = node_config(dir.path());
    let service = build(&config, Arc::new(RecordingBroker::new())).await;

    let file = write_file(dir.path(), "incoming/obs.csv", fixtures::SINGLE_ROW_CSV);
    let cancel = CancellationToken::new();
    cancel.cancel();
    service.run(cancel, false, DRAIN).await.unwrap();

    assert!(file.exists());
    assert_eq!(service.watcher.in_progress(), 0);
}

#[tokio::test]
async fn test_admission_suspends_until_outbox_drains() {
    let db = Database::open_memory().await.unwrap();
    let broker = Arc::new(RecordingBroker::new());
    let publisher = Publisher::new(
        db.outbox(),
        broker.clone(),
        Arc::new(SystemClock),
        PublisherSettings {
            partitions: 1,
            ..PublisherSettings::default()
        },
    );
    let gate = Arc::new(AdmissionGate::new(db.outbox(), 2, 1, publisher.depth_notifier()));

    // Two keys, so a single pass drains both
    for (id, key) in [("n1", "a"), ("n2", "b")] {
        publisher
            .enqueue(&fixtures::notification(id, DATASET_ID, key))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let waiting = {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.admit(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiting.is_finished());
    assert_eq!(gate.state(), Admission::Suspended);

    let report = publisher.deliver_due(0).await.unwrap();
    assert_eq!(report.acked, 2);

    let admitted = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(admitted);
    assert_eq!(gate.state(), Admission::Open);
    assert_eq!(
        db.outbox().list(OutboxState::Acked, 10).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_admission_wait_is_cancellable() {
    let db = Database::open_memory().await.unwrap();
    let publisher = Publisher::new(
        db.outbox(),
        Arc::new(RecordingBroker::new()),
        Arc::new(SystemClock),
        PublisherSettings::default(),
    );
    publisher
        .enqueue(&fixtures::notification("n1", DATASET_ID, DATASET_ID))
        .await
        .unwrap();
    let gate = AdmissionGate::new(db.outbox(), 1, 0, publisher.depth_notifier());

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(!gate.admit(&cancel).await.unwrap());
}
