//! HTTP client for the broker's client-facing endpoints.
//!
//! Each method is a single request, except [`RelayClient::wait_for_result`]
//! and [`RelayClient::render`], which poll job status at a fixed interval
//! and give up at a hard ceiling.

use std::time::Duration;

use relay_core::job::{JobOutput, JobStatus, JobSummary, NewJob};
use relay_core::media::{image_extension, OCTET_STREAM};
use relay_core::types::JobId;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// HTTP client for one broker.
#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    base_url: String,
}

/// How [`RelayClient::wait_for_result`] polls.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Pause between status requests.
    pub interval: Duration,
    /// Total time to wait before giving up.
    pub ceiling: Duration,
}

impl Default for PollPolicy {
    /// 500 ms between polls; give up after 15 minutes, the broker's
    /// default max job age.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            ceiling: Duration::from_secs(900),
        }
    }
}

/// `GET /health` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub jobs_count: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

/// Errors from the broker client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The broker answered with a non-2xx status.
    #[error("Broker error ({status} {code}): {message}")]
    Api {
        status: u16,
        /// Machine-readable code from the error body, e.g. `NOT_FOUND`.
        code: String,
        message: String,
    },

    /// The job reached `error`.
    #[error("Job {id} failed: {message}")]
    JobFailed { id: JobId, message: String },

    /// The job was still queued or running when the ceiling was reached.
    #[error("Job {id} not finished after {waited:?}")]
    Timeout { id: JobId, waited: Duration },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status: 404, .. })
    }
}

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

impl RelayClient {
    /// * `base_url` - Broker root, e.g. `http://host:8080`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, path: &str) -> String {
        format!("{}/api/v1/jobs{path}", self.base_url)
    }

    /// Submit a frame. The upload's file name carries the sniffed image
    /// extension.
    pub async fn submit(&self, job: NewJob) -> Result<JobSummary, ClientError> {
        let file_name = format!("frame.{}", image_extension(&job.image));
        let mut form = Form::new().part("image", Part::bytes(job.image).file_name(file_name));
        if let Some(prompt) = job.prompt {
            form = form.text("prompt", prompt);
        }
        if let Some(negative) = job.negative_prompt {
            form = form.text("negative_prompt", negative);
        }
        if let Some(seed) = job.seed {
            form = form.text("seed", seed.to_string());
        }

        let response = self
            .client
            .post(self.job_url(""))
            .multipart(form)
            .send()
            .await?;
        let summary: Envelope<JobSummary> = check(response).await?.json().await?;

        tracing::debug!(job_id = %summary.data.id, "Frame submitted");
        Ok(summary.data)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSummary, ClientError> {
        let response = self.client.get(self.job_url(&format!("/{id}"))).send().await?;
        let summary: Envelope<JobSummary> = check(response).await?.json().await?;
        Ok(summary.data)
    }

    /// Download the result of a `done` job.
    pub async fn result(&self, id: JobId) -> Result<JobOutput, ClientError> {
        let response = self
            .client
            .get(self.job_url(&format!("/{id}/result")))
            .send()
            .await?;
        let response = check(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OCTET_STREAM)
            .to_string();
        let data = response.bytes().await?.to_vec();
        Ok(JobOutput { data, content_type })
    }

    pub async fn delete(&self, id: JobId) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.job_url(&format!("/{id}")))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Whether a new frame may be submitted: there is no current job, it
    /// has finished, or its status cannot be read.
    pub async fn is_ready_for_next(&self, current: Option<JobId>) -> bool {
        let Some(id) = current else {
            return true;
        };
        match self.status(id).await {
            Ok(summary) => summary.status.is_terminal(),
            Err(e) => {
                tracing::debug!(job_id = %id, error = %e, "Status check failed, treating job as finished");
                true
            }
        }
    }

    /// Poll until the job is terminal, then download its result.
    ///
    /// Fails with [`ClientError::JobFailed`] if the job ends in `error` and
    /// with [`ClientError::Timeout`] once `policy.ceiling` has elapsed.
    pub async fn wait_for_result(
        &self,
        id: JobId,
        policy: PollPolicy,
    ) -> Result<JobOutput, ClientError> {
        let summary = tokio::time::timeout(policy.ceiling, self.poll_until_terminal(id, policy.interval))
            .await
            .map_err(|_| ClientError::Timeout {
                id,
                waited: policy.ceiling,
            })??;

        match summary.status {
            JobStatus::Done => self.result(id).await,
            _ => Err(ClientError::JobFailed {
                id,
                message: summary
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }

    /// Submit, wait for the result and delete the finished job.
    ///
    /// A job that times out is left on the broker; the reaper expires it.
    pub async fn render(&self, job: NewJob, policy: PollPolicy) -> Result<JobOutput, ClientError> {
        let id = self.submit(job).await?.id;
        let outcome = self.wait_for_result(id, policy).await;

        if !matches!(outcome, Err(ClientError::Timeout { .. })) {
            if let Err(e) = self.delete(id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to delete finished job");
            }
        }
        outcome
    }

    async fn poll_until_terminal(
        &self,
        id: JobId,
        interval: Duration,
    ) -> Result<JobSummary, ClientError> {
        loop {
            let summary = self.status(id).await?;
            if summary.status.is_terminal() {
                return Ok(summary);
            }
            tracing::trace!(job_id = %id, status = %summary.status, "Job not finished yet");
            tokio::time::sleep(interval).await;
        }
    }
}

// ---- private helpers ----

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.code.is_empty() => (parsed.code, parsed.error),
        _ => (String::new(), body),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
