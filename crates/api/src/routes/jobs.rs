//! Route definitions for the `/jobs` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Largest result body a worker may post to `/{id}/complete`.
pub const MAX_RESULT_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Room for the multipart framing and text fields around a submitted image.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Routes mounted at `/jobs`.
///
/// Submission bodies are capped at `max_image_bytes` plus framing, so an
/// oversized upload is cut off while streaming. Only `/{id}/complete`
/// accepts large bodies.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> delete_job
/// GET    /{id}/result     -> get_result
/// GET    /{id}/input      -> get_input      (worker)
/// POST   /{id}/complete   -> complete_job   (worker)
/// POST   /{id}/fail       -> fail_job       (worker)
/// ```
pub fn router(max_image_bytes: usize) -> Router<AppState> {
    let submit_limit = max_image_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/",
            get(jobs::list_jobs)
                .post(jobs::submit_job)
                .layer(DefaultBodyLimit::max(submit_limit)),
        )
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/result", get(jobs::get_result))
        .route("/{id}/input", get(jobs::get_input))
        .route(
            "/{id}/complete",
            post(jobs::complete_job).layer(DefaultBodyLimit::max(MAX_RESULT_BODY_BYTES)),
        )
        .route("/{id}/fail", post(jobs::fail_job))
}
