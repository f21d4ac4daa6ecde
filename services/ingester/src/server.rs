//! HTTP server for the ingester service.
//!
//! Provides endpoints for:
//! - `GET /health` - Health check
//! - `GET /status` - Outbox counts, admission state and in-flight events
//! - `GET /outbox/dead` - Notifications that exhausted their retries
//! - `POST /outbox/:id/retry` - Put a dead notification back in line
//! - `GET /dead-letters` - Abandoned intake events
//! - `GET /metrics` - Prometheus metrics

use std::future::ready;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use publisher::Publisher;
use serde::{Deserialize, Serialize};
use storage::{DeadLetter, DeadLetterSink, OutboxCounts, OutboxEntry, OutboxState};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::backpressure::{Admission, AdmissionGate};
use crate::tracker::{EventTracker, TrackerSnapshot};

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

/// Shared state for the HTTP server.
pub struct ServerState {
    pub publisher: Arc<Publisher>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub gate: Arc<AdmissionGate>,
    pub tracker: Arc<EventTracker>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub admission: Admission,
    pub outbox: OutboxCounts,
    pub events: TrackerSnapshot,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

impl ListParams {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: e.to_string() }),
    )
}

/// GET /health - Health check
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "ingester".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status - Pipeline status
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    match state.publisher.outbox().counts().await {
        Ok(outbox) => {
            let response = StatusResponse {
                admission: state.gate.state(),
                outbox,
                events: state.tracker.snapshot(20).await,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

/// GET /outbox/dead - Dead notifications, oldest first
async fn dead_outbox_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.publisher.outbox().list(OutboxState::Dead, params.limit()).await {
        Ok(entries) => (StatusCode::OK, Json::<Vec<OutboxEntry>>(entries)).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// POST /outbox/:id/retry - Requeue a dead notification
async fn retry_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let outbox = state.publisher.outbox();
    let entry = match outbox.get(&id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            let body = ErrorResponse {
                error: format!("No outbox entry {}", id),
            };
            return (StatusCode::NOT_FOUND, Json(body)).into_response();
        }
        Err(e) => return internal_error(e).into_response(),
    };

    match outbox.requeue_dead(&id, Utc::now()).await {
        Ok(true) => {
            info!(id = %id, partition = entry.partition, "Dead notification requeued");
            state.publisher.wake(entry.partition);
            match outbox.get(&id).await {
                Ok(Some(entry)) => (StatusCode::OK, Json(entry)).into_response(),
                Ok(None) => StatusCode::OK.into_response(),
                Err(e) => internal_error(e).into_response(),
            }
        }
        Ok(false) => {
            let body = ErrorResponse {
                error: format!("Outbox entry {} is {}, not DEAD", id, entry.state.as_str()),
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

/// GET /dead-letters - Abandoned intake events, newest first
async fn dead_letters_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.dead_letters.list(params.limit()).await {
        Ok(letters) => (StatusCode::OK, Json::<Vec<DeadLetter>>(letters)).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/outbox/dead", get(dead_outbox_handler))
        .route("/outbox/:id/retry", post(retry_handler))
        .route("/dead-letters", get(dead_letters_handler))
        .route(
            "/metrics",
            get(move || match metrics {
                Some(ref handle) => ready(handle.render()),
                None => ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Serve until `cancel` fires.
pub async fn start_server(
    state: Arc<ServerState>,
    metrics: Option<PrometheusHandle>,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state, metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting ingester HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
