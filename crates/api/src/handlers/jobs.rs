//! Handlers for the `/jobs` resource.
//!
//! Client-facing endpoints (submit, list, status, result, delete) plus the
//! worker write-back endpoints used by a remote worker.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::broker::JobList;
use relay_core::error::CoreError;
use relay_core::job::{JobOutput, JobStatus, JobSummary, NewJob};
use relay_core::media::{content_type_for_extension, image_extension, OCTET_STREAM};
use relay_core::types::JobId;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::query::ListJobsParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Multipart fields: `image` (file, required), `prompt`, `negative_prompt`,
/// `seed` (decimal). Unknown fields are ignored.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<JobSummary>>)> {
    let mut image: Option<Vec<u8>> = None;
    let mut prompt: Option<String> = None;
    let mut negative_prompt: Option<String> = None;
    let mut seed: Option<u64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                image = Some(data.to_vec());
            }
            "prompt" => prompt = Some(text_field(field).await?),
            "negative_prompt" => negative_prompt = Some(text_field(field).await?),
            "seed" => {
                let raw = text_field(field).await?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    seed = Some(raw.parse().map_err(|_| {
                        CoreError::Validation(format!(
                            "Seed must be a non-negative integer, got '{raw}'"
                        ))
                    })?);
                }
            }
            _ => {} // ignore unknown fields
        }
    }

    let image = image.ok_or_else(|| {
        CoreError::Validation("Missing required 'image' field".to_string())
    })?;

    let summary = state
        .broker
        .submit(NewJob {
            image,
            prompt,
            negative_prompt,
            seed,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: summary })))
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. `status` filters by lifecycle status; `limit` defaults to
/// 50 and is capped at 500.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> AppResult<Json<DataResponse<JobList>>> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            CoreError::Validation(format!(
                "Unknown status '{raw}', expected one of queued, running, done, error"
            ))
        })?),
    };

    let jobs = state
        .broker
        .list(status, params.limit, params.offset)
        .await;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<JobSummary>>> {
    let summary = state.broker.status(id).await?;
    Ok(Json(DataResponse { data: summary }))
}

/// GET /api/v1/jobs/{id}/result
///
/// Raw output bytes with the content type the backend declared.
/// 409 while queued or running, 422 if the job failed.
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Response> {
    let output = state.broker.result(id).await?;
    Ok(([(header::CONTENT_TYPE, output.content_type)], output.data).into_response())
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.broker.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Worker write-back
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    pub message: String,
}

/// GET /api/v1/jobs/{id}/input
pub async fn get_input(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Response> {
    let image = state.broker.input_image(id).await?;
    let content_type = content_type_for_extension(image_extension(&image));
    Ok(([(header::CONTENT_TYPE, content_type)], image).into_response())
}

/// POST /api/v1/jobs/{id}/complete
///
/// The request body is the result; its `Content-Type` is stored with it.
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    if body.is_empty() {
        return Err(CoreError::Validation("Result body must not be empty".to_string()).into());
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(OCTET_STREAM)
        .to_string();

    state
        .broker
        .complete(
            id,
            JobOutput {
                data: body.to_vec(),
                content_type,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{id}/fail
pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Json(input): Json<FailJobRequest>,
) -> AppResult<StatusCode> {
    state.broker.fail(id, input.message).await?;
    Ok(StatusCode::NO_CONTENT)
}
