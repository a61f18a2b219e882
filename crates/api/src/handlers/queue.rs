//! Worker-facing queue endpoint.

use axum::extract::State;
use axum::Json;
use relay_core::job::ClaimedJob;

use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/queue/claim
///
/// Moves the oldest queued job to `running` and returns it, or `null` when
/// nothing is queued. The input image is fetched separately.
pub async fn claim_job(State(state): State<AppState>) -> Json<DataResponse<Option<ClaimedJob>>> {
    let claimed = state.broker.claim_next().await;
    Json(DataResponse {
        data: claimed.as_ref().map(ClaimedJob::from_job),
    })
}
