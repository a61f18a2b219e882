//! The worker's view of the job table.
//!
//! A worker only needs to claim work and report outcomes. [`JobQueue`] is
//! implemented directly by [`JobStore`] for an in-process worker and by an
//! HTTP client for a worker running next to the rendering backend.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::{Job, JobOutput};
use crate::store::JobStore;
use crate::types::JobId;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the oldest queued job, if any.
    async fn claim_next(&self) -> Result<Option<Job>, CoreError>;

    /// Report a successful render.
    async fn complete(&self, id: JobId, output: JobOutput) -> Result<(), CoreError>;

    /// Report a failed render.
    async fn fail(&self, id: JobId, message: String) -> Result<(), CoreError>;
}

#[async_trait]
impl JobQueue for JobStore {
    async fn claim_next(&self) -> Result<Option<Job>, CoreError> {
        Ok(JobStore::claim_next(self).await)
    }

    async fn complete(&self, id: JobId, output: JobOutput) -> Result<(), CoreError> {
        JobStore::complete(self, id, output).await
    }

    async fn fail(&self, id: JobId, message: String) -> Result<(), CoreError> {
        JobStore::fail(self, id, message).await
    }
}
