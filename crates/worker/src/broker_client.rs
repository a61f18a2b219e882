//! HTTP [`JobQueue`] for a worker running away from the broker process.
//!
//! Talks to the broker's worker-facing endpoints:
//! `POST /api/v1/queue/claim`, `GET /api/v1/jobs/{id}/input`,
//! `POST /api/v1/jobs/{id}/complete` and `POST /api/v1/jobs/{id}/fail`.

use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_core::job::{ClaimedJob, Job, JobOutput};
use relay_core::queue::JobQueue;
use relay_core::types::JobId;
use reqwest::StatusCode;
use serde::Deserialize;

/// `{ "data": T }` envelope used by every broker JSON response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

#[derive(Clone)]
pub struct BrokerClient {
    client: reqwest::Client,
    base_url: String,
}

impl BrokerClient {
    /// * `base_url` - Broker root, e.g. `http://host:8080`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    async fn fetch_input(&self, id: JobId) -> Result<Vec<u8>, CoreError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{id}/input")))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_write(id, response).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl JobQueue for BrokerClient {
    async fn claim_next(&self) -> Result<Option<Job>, CoreError> {
        let response = self
            .client
            .post(self.url("/queue/claim"))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(broker_error(response).await);
        }

        let claimed: Envelope<Option<ClaimedJob>> =
            response.json().await.map_err(transport_error)?;
        let Some(claimed) = claimed.data else {
            return Ok(None);
        };

        // Deleted between the claim and the download: nothing to render.
        let input = match self.fetch_input(claimed.id).await {
            Ok(input) => input,
            Err(e) if e.is_stale() => {
                tracing::warn!(job_id = %claimed.id, "Claimed job vanished before input download");
                return Ok(None);
            }
            Err(e) => {
                // The claim is already committed; release it as failed.
                let message = format!("Failed to download input image: {e}");
                match self.fail(claimed.id, message).await {
                    Ok(()) => {}
                    Err(fail_err) if fail_err.is_stale() => {
                        tracing::warn!(job_id = %claimed.id, "Claimed job vanished before it could be failed");
                    }
                    Err(fail_err) => {
                        tracing::error!(
                            job_id = %claimed.id,
                            error = %fail_err,
                            "Failed to release claimed job",
                        );
                    }
                }
                return Err(e);
            }
        };

        Ok(Some(claimed.into_job(input)))
    }

    async fn complete(&self, id: JobId, output: JobOutput) -> Result<(), CoreError> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{id}/complete")))
            .header(reqwest::header::CONTENT_TYPE, output.content_type)
            .body(output.data)
            .send()
            .await
            .map_err(transport_error)?;
        check_write(id, response).await.map(|_| ())
    }

    async fn fail(&self, id: JobId, message: String) -> Result<(), CoreError> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{id}/fail")))
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(transport_error)?;
        check_write(id, response).await.map(|_| ())
    }
}

// ---- private helpers ----

fn transport_error(err: reqwest::Error) -> CoreError {
    CoreError::Internal(format!("Broker request failed: {err}"))
}

/// Map a job-scoped response: a missing job or a lost transition race
/// becomes [`CoreError::StaleJob`].
async fn check_write(
    id: JobId,
    response: reqwest::Response,
) -> Result<reqwest::Response, CoreError> {
    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(CoreError::StaleJob { id }),
        _ => Err(broker_error(response).await),
    }
}

async fn broker_error(response: reqwest::Response) -> CoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.code.is_empty() => format!("{}: {}", parsed.code, parsed.error),
        _ => body,
    };
    CoreError::Internal(format!("Broker returned {status}: {detail}"))
}
