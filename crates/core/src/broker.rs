//! Client-facing job operations.
//!
//! [`JobBroker`] validates requests and translates them into
//! [`JobStore`] operations. It never interprets rendering outcomes; the
//! worker endpoints it exposes are straight pass-throughs to the store.

use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;
use crate::job::{Job, JobOutput, JobStatus, JobSummary, NewJob, StatusCounts};
use crate::store::JobStore;
use crate::types::JobId;

/// Default maximum accepted input image size (20 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Maximum prompt / negative prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 10_000;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: usize = 500;

/// One page of jobs plus the size of the whole table.
#[derive(Debug, Serialize)]
pub struct JobList {
    pub total: usize,
    pub returned: usize,
    pub jobs: Vec<JobSummary>,
}

#[derive(Clone)]
pub struct JobBroker {
    store: Arc<JobStore>,
    max_image_bytes: usize,
}

impl JobBroker {
    pub fn new(store: Arc<JobStore>, max_image_bytes: usize) -> Self {
        Self {
            store,
            max_image_bytes,
        }
    }

    /// The underlying store, shared with the reaper and an embedded worker.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate and enqueue a new job.
    pub async fn submit(&self, input: NewJob) -> Result<JobSummary, CoreError> {
        let input = self.validate(input)?;
        let image_bytes = input.image.len();
        let summary = self.store.create(input).await;

        tracing::info!(
            job_id = %summary.id,
            image_bytes,
            prompt = summary.prompt.as_deref().unwrap_or(""),
            "Job queued",
        );

        Ok(summary)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSummary, CoreError> {
        self.store
            .inspect(id, Job::summary)
            .await
            .ok_or_else(|| not_found(id))
    }

    /// Output bytes of a `done` job.
    pub async fn result(&self, id: JobId) -> Result<JobOutput, CoreError> {
        self.store
            .inspect(id, |job| match (job.status, &job.result) {
                (JobStatus::Done, Some(output)) => Ok(output.clone()),
                (JobStatus::Error, _) => Err(CoreError::Failed {
                    id,
                    message: job
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                }),
                (status, _) => Err(CoreError::NotReady { id, status }),
            })
            .await
            .ok_or_else(|| not_found(id))?
    }

    /// Remove a job. A second delete of the same id is `NotFound`.
    pub async fn delete(&self, id: JobId) -> Result<(), CoreError> {
        if self.store.delete(id).await {
            tracing::info!(job_id = %id, "Job deleted");
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    /// List jobs newest first. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> JobList {
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let jobs = self
            .store
            .list(status, limit, offset.unwrap_or(0))
            .await;
        JobList {
            total: self.store.len().await,
            returned: jobs.len(),
            jobs,
        }
    }

    pub async fn health(&self) -> StatusCounts {
        self.store.counts().await
    }

    // ---- worker-facing ----

    pub async fn claim_next(&self) -> Option<Job> {
        let job = self.store.claim_next().await?;
        tracing::info!(job_id = %job.id, "Job claimed");
        Some(job)
    }

    pub async fn input_image(&self, id: JobId) -> Result<Vec<u8>, CoreError> {
        self.store
            .inspect(id, |job| job.input_image.clone())
            .await
            .ok_or_else(|| not_found(id))
    }

    pub async fn complete(&self, id: JobId, output: JobOutput) -> Result<(), CoreError> {
        let bytes = output.data.len();
        self.store.complete(id, output).await?;
        tracing::info!(job_id = %id, bytes, "Job completed");
        Ok(())
    }

    pub async fn fail(&self, id: JobId, message: String) -> Result<(), CoreError> {
        self.store.fail(id, message.clone()).await?;
        tracing::warn!(job_id = %id, error = %message, "Job failed");
        Ok(())
    }

    fn validate(&self, mut input: NewJob) -> Result<NewJob, CoreError> {
        if input.image.is_empty() {
            return Err(CoreError::Validation(
                "Image payload must not be empty".to_string(),
            ));
        }
        if input.image.len() > self.max_image_bytes {
            return Err(CoreError::Validation(format!(
                "Image payload is {} bytes, maximum is {}",
                input.image.len(),
                self.max_image_bytes
            )));
        }
        for (field, value) in [
            ("prompt", &input.prompt),
            ("negative_prompt", &input.negative_prompt),
        ] {
            if let Some(text) = value {
                if text.chars().count() > MAX_PROMPT_LENGTH {
                    return Err(CoreError::Validation(format!(
                        "{field} exceeds {MAX_PROMPT_LENGTH} characters"
                    )));
                }
            }
        }

        // An empty prompt means "use the workflow default".
        input.prompt = input.prompt.filter(|p| !p.trim().is_empty());
        Ok(input)
    }
}

fn not_found(id: JobId) -> CoreError {
    CoreError::NotFound { entity: "Job", id }
}
