use crate::job::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: JobId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The result was requested before the job reached `done`.
    #[error("Job {id} is not ready (status: {status})")]
    NotReady { id: JobId, status: JobStatus },

    /// The job ended in `error`; carries the stored message.
    #[error("Job {id} failed: {message}")]
    Failed { id: JobId, message: String },

    /// A write targeted a job that no longer exists.
    #[error("Stale job: {id} no longer exists")]
    StaleJob { id: JobId },

    /// A write targeted a job that is not in the state the transition requires.
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for the write-back conflicts a worker must log and discard.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            CoreError::StaleJob { .. } | CoreError::InvalidTransition { .. }
        )
    }
}
