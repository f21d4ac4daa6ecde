//! Tests for the ingester HTTP routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt; // for `collect`
use tower::ServiceExt; // for `oneshot`

use ingester::backpressure::AdmissionGate;
use ingester::server::{build_router, ServerState};
use ingester::tracker::EventTracker;
use publisher::{Publisher, PublisherSettings, SystemClock};
use storage::{Database, DeadLetter, DeadLetterSink, DeadLetterStage};
use test_utils::fixtures::{self, DATASET_ID};
use test_utils::RecordingBroker;

async fn state() -> (Arc<ServerState>, Database) {
    let db = Database::open_memory().await.unwrap();
    let publisher = Arc::new(Publisher::new(
        db.outbox(),
        Arc::new(RecordingBroker::new()),
        Arc::new(SystemClock),
        PublisherSettings::default(),
    ));
    let gate = Arc::new(AdmissionGate::new(
        db.outbox(),
        100,
        50,
        publisher.depth_notifier(),
    ));
    let state = Arc::new(ServerState {
        publisher,
        dead_letters: Arc::new(db.dead_letters()),
        gate,
        tracker: Arc::new(EventTracker::default()),
    });
    (state, db)
}

async fn send(state: &Arc<ServerState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = build_router(Arc::clone(state), None)
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (state, _db) = state().await;
    let (status, json) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "ingester");
}

#[tokio::test]
async fn test_status_reports_outbox_and_admission() {
    let (state, _db) = state().await;
    state
        .publisher
        .enqueue(&fixtures::notification("n1", DATASET_ID, DATASET_ID))
        .await
        .unwrap();
    state.tracker.start("incoming/a.csv").await;

    let (status, json) = send(&state, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["admission"], "open");
    assert_eq!(json["outbox"]["pending"], 1);
    assert_eq!(json["events"]["active"][0]["state"], "RECEIVED");
}

#[tokio::test]
async fn test_dead_notification_can_be_retried() {
    let (state, db) = state().await;
    let outbox = db.outbox();
    state
        .publisher
        .enqueue(&fixtures::notification("n1", DATASET_ID, DATASET_ID))
        .await
        .unwrap();
    assert!(outbox.mark_dead("n1", "rejected", Utc::now()).await.unwrap());

    let (status, json) = send(&state, get("/outbox/dead?limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["id"], "n1");
    assert_eq!(json[0]["last_error"], "rejected");

    let (status, json) = send(&state, post("/outbox/n1/retry")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["attempt_count"], 0);

    let entry = outbox.get("n1").await.unwrap().unwrap();
    assert_eq!(entry.state, storage::OutboxState::Pending);

    // No longer dead
    let (status, _) = send(&state, post("/outbox/n1/retry")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&state, post("/outbox/missing/retry")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dead_letters_listing() {
    let (state, _db) = state().await;
    state
        .dead_letters
        .record(DeadLetter::new("incoming/a.bufr", DeadLetterStage::Conversion, "truncated"))
        .await
        .unwrap();
    state
        .dead_letters
        .record(DeadLetter::new("incoming/b.csv", DeadLetterStage::Binding, "Unknown station: x"))
        .await
        .unwrap();

    let (status, json) = send(&state, get("/dead-letters?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (_, json) = send(&state, get("/dead-letters")).await;
    let stages: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["stage"].as_str().unwrap())
        .collect();
    assert_eq!(stages.len(), 2);
    assert!(stages.contains(&"conversion"));
    assert!(stages.contains(&"binding"));
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let (state, _db) = state().await;
    let response = build_router(state, None).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"no metrics recorder installed");
}
