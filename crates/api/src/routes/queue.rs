use axum::routing::post;
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
///
/// ```text
/// POST   /claim           -> claim_job      (worker)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/claim", post(queue::claim_job))
}
