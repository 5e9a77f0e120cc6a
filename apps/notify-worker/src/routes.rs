use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::metrics;
use crate::state::AppState;
use crate::worker::WorkerEvent;

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    uptime_secs: u64,
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
    })
}

fn enqueue(state: &AppState, event: WorkerEvent) -> StatusCode {
    match state.events().try_send(event) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(TrySendError::Full(_)) => {
            warn!(target = "notify.worker", "event queue full; rejecting");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(TrySendError::Closed(_)) => {
            warn!(target = "notify.worker", "worker stopped; rejecting");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn push(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let status = enqueue(&state, WorkerEvent::Push(body));
    if status != StatusCode::ACCEPTED {
        metrics::PUSH_EVENTS.with_label_values(&["rejected"]).inc();
    }
    status
}

async fn click(State(state): State<AppState>, Path(tag): Path<String>) -> StatusCode {
    let status = enqueue(&state, WorkerEvent::Click { tag });
    if status != StatusCode::ACCEPTED {
        metrics::CLICKS.with_label_values(&["rejected"]).inc();
    }
    status
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/push", post(push))
        .route("/notifications/:tag/click", post(click))
        .with_state(state)
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        metrics::gather(),
    )
}
