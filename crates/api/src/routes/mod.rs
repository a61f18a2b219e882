pub mod health;
pub mod jobs;
pub mod queue;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                          list, submit
/// /jobs/{id}                     status, delete
/// /jobs/{id}/result              result bytes
/// /jobs/{id}/input               input image (worker)
/// /jobs/{id}/complete            record success (worker)
/// /jobs/{id}/fail                record failure (worker)
///
/// /queue/claim                   claim next queued job (worker)
/// ```
pub fn api_routes(max_image_bytes: usize) -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router(max_image_bytes))
        .nest("/queue", queue::router())
}
