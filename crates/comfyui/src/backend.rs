//! [`RenderBackend`] implementation backed by a ComfyUI instance.

use std::path::PathBuf;

use async_trait::async_trait;
use relay_core::backend::{BackendError, BackendStatus, ExecutionHandle, RenderBackend};
use relay_core::job::JobOutput;
use relay_core::media::{content_type_for_file_name, OCTET_STREAM};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{find_entry, HistoryEntry};

/// Drives workflows through one ComfyUI server.
pub struct ComfyUIBackend {
    api: ComfyUIApi,
    /// Sent with every submission so ComfyUI can attribute prompts to us.
    client_id: String,
    /// When set, staged inputs are referenced by absolute path under this
    /// directory (for path-based loaders such as `VHS_LoadImagePath`).
    input_dir: Option<PathBuf>,
}

impl ComfyUIBackend {
    pub fn new(api: ComfyUIApi) -> Self {
        Self {
            api,
            client_id: uuid::Uuid::new_v4().to_string(),
            input_dir: None,
        }
    }

    pub fn with_input_dir(mut self, input_dir: Option<PathBuf>) -> Self {
        self.input_dir = input_dir;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn history_entry(&self, handle: &ExecutionHandle) -> Result<Option<HistoryEntry>, BackendError> {
        let history = self.api.get_history(&handle.0).await?;
        find_entry(&history, &handle.0)
            .map_err(|e| BackendError::new(format!("Malformed ComfyUI history for {handle}: {e}")))
    }
}

impl From<ComfyUIApiError> for BackendError {
    fn from(err: ComfyUIApiError) -> Self {
        BackendError::new(err.to_string())
    }
}

#[async_trait]
impl RenderBackend for ComfyUIBackend {
    async fn stage_input(&self, file_name: &str, data: Vec<u8>) -> Result<String, BackendError> {
        let uploaded = self.api.upload_image(file_name, data).await?;
        let relative = if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        };

        let staged = match &self.input_dir {
            Some(dir) => dir.join(&relative).to_string_lossy().into_owned(),
            None => relative,
        };
        tracing::debug!(file_name, staged = %staged, "Input image staged in ComfyUI");
        Ok(staged)
    }

    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<ExecutionHandle, BackendError> {
        let submitted = self.api.submit_workflow(workflow, &self.client_id).await?;
        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Workflow queued in ComfyUI",
        );
        Ok(ExecutionHandle(submitted.prompt_id))
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<BackendStatus, BackendError> {
        if let Some(status) = self
            .history_entry(handle)
            .await?
            .and_then(|entry| entry.status())
        {
            return Ok(status);
        }

        let queue = self.api.get_queue().await?;
        if queue.is_running(&handle.0) {
            Ok(BackendStatus::Running)
        } else {
            if !queue.is_pending(&handle.0) {
                // Finished between the two requests, or dropped by ComfyUI;
                // the next poll's history lookup tells which.
                tracing::debug!(prompt_id = %handle, "Prompt neither queued nor in history");
            }
            Ok(BackendStatus::Pending)
        }
    }

    async fn fetch_output(&self, handle: &ExecutionHandle) -> Result<JobOutput, BackendError> {
        let entry = self
            .history_entry(handle)
            .await?
            .ok_or_else(|| BackendError::new(format!("No history for prompt {handle}")))?;
        let file = entry.first_output().ok_or_else(|| {
            BackendError::new("Workflow completed but no output file found")
        })?;

        let downloaded = self.api.view(file).await?;
        let content_type = downloaded
            .content_type
            .filter(|ct| ct != OCTET_STREAM && !ct.is_empty())
            .unwrap_or_else(|| content_type_for_file_name(&file.filename).to_string());

        tracing::info!(
            prompt_id = %handle,
            filename = %file.filename,
            bytes = downloaded.data.len(),
            content_type = %content_type,
            "Fetched ComfyUI output",
        );

        Ok(JobOutput {
            data: downloaded.data,
            content_type,
        })
    }
}
