use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub jobs_count: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

/// GET /health -- returns service status and job counts per status.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.broker.health().await;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs_count: counts.total(),
        queued: counts.queued,
        running: counts.running,
        done: counts.done,
        error: counts.error,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
