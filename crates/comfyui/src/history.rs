//! Typed views of ComfyUI `/history` and `/queue` responses.
//!
//! A history entry appears once a prompt has finished (successfully or
//! not). Its `outputs` map node ids to the files each output node wrote.

use indexmap::IndexMap;
use relay_core::backend::BackendStatus;
use serde::Deserialize;

/// One prompt's entry in the `/history/{prompt_id}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Keyed by node id, in the order ComfyUI reported them.
    #[serde(default)]
    pub outputs: Option<IndexMap<String, NodeOutput>>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Files written by a single output node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// `SaveImage` outputs.
    #[serde(default)]
    pub images: Vec<OutputFile>,
    /// `SaveVideo` outputs.
    #[serde(default)]
    pub videos: Vec<OutputFile>,
    /// `VHS_VideoCombine` reports its videos here.
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
}

/// A file reference as accepted by `GET /view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// `GET /queue` response. Items are `[number, prompt_id, prompt, extra, outputs]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

impl QueueState {
    pub fn is_running(&self, prompt_id: &str) -> bool {
        contains_prompt(&self.queue_running, prompt_id)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        contains_prompt(&self.queue_pending, prompt_id)
    }
}

fn contains_prompt(items: &[serde_json::Value], prompt_id: &str) -> bool {
    items
        .iter()
        .any(|item| item.get(1).and_then(|v| v.as_str()) == Some(prompt_id))
}

/// Extract the entry for `prompt_id` from a `/history/{prompt_id}` body.
///
/// Returns `Ok(None)` while the prompt has not finished.
pub fn find_entry(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match history.get(prompt_id) {
        Some(raw) => serde_json::from_value(raw.clone()).map(Some),
        None => Ok(None),
    }
}

impl HistoryEntry {
    /// Terminal status of a finished entry, or `None` if it is not finished yet.
    pub fn status(&self) -> Option<BackendStatus> {
        if let Some(status) = &self.status {
            if status.status_str == "error" {
                return Some(BackendStatus::Failed(self.error_summary()));
            }
        }
        let finished = self.outputs.is_some()
            || self.status.as_ref().is_some_and(|s| s.completed);
        finished.then_some(BackendStatus::Complete)
    }

    /// First output file, scanning nodes in reported order and images
    /// before videos.
    pub fn first_output(&self) -> Option<&OutputFile> {
        self.outputs.as_ref()?.values().find_map(|node| {
            node.images
                .first()
                .or_else(|| node.videos.first())
                .or_else(|| node.gifs.first())
        })
    }

    fn error_summary(&self) -> String {
        let messages = self
            .status
            .as_ref()
            .map(|s| s.messages.as_slice())
            .unwrap_or_default();

        let details: Vec<String> = messages
            .iter()
            .filter(|m| m.get(0).and_then(|v| v.as_str()) == Some("execution_error"))
            .filter_map(|m| {
                let payload = m.get(1)?;
                let message = payload.get("exception_message")?.as_str()?.trim();
                match payload.get("node_id").and_then(|v| v.as_str()) {
                    Some(node) => Some(format!("node {node}: {message}")),
                    None => Some(message.to_string()),
                }
            })
            .collect();

        if details.is_empty() {
            "Workflow execution failed: Unknown error".to_string()
        } else {
            format!("Workflow execution failed: {}", details.join("; "))
        }
    }
}
