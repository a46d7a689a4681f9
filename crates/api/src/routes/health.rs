use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use stampsync_core::metrics::METRICS;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Ready once the design store answers. A missing row is still an answer.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.sync.designs.get_business("__readiness_probe__").await {
        Ok(_) | Err(stampsync_core::SyncError::NotFound(_)) => {
            (StatusCode::OK, Json(HealthResponse { status: "ok" }))
        }
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "unavailable" }),
            )
        }
    }
}

async fn metrics() -> String {
    METRICS.gather()
}
