//! Seam between the worker loop and a remote rendering service.

use std::fmt;

use async_trait::async_trait;

use crate::job::JobOutput;

/// Backend-side identifier of one submitted workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(pub String);

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discrete execution status reported by a backend poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Accepted but waiting for the backend's execution slot.
    Pending,
    Running,
    Complete,
    /// Execution finished with an error; carries the backend's message.
    Failed(String),
}

/// Error raised by a backend adapter (transport, protocol, missing output).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Protocol client for a rendering backend.
///
/// Implementations must not assume an in-flight execution can be cancelled.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Upload the job's input image; returns the name the workflow must reference.
    async fn stage_input(&self, file_name: &str, data: Vec<u8>) -> Result<String, BackendError>;

    /// Queue a rendered workflow graph for execution.
    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<ExecutionHandle, BackendError>;

    async fn poll(&self, handle: &ExecutionHandle) -> Result<BackendStatus, BackendError>;

    /// Retrieve the primary output of a completed execution.
    async fn fetch_output(&self, handle: &ExecutionHandle) -> Result<JobOutput, BackendError>;
}
