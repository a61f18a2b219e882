//! ComfyUI workflow template rendering.
//!
//! A template is an API-format graph (`{ "<node id>": { "class_type": ..,
//! "inputs": { .. } } }`) plus a [`WorkflowNodes`] map saying which node
//! inputs receive the job's parameters. Rendering clones the graph and
//! injects the values; the template itself is never mutated.

use std::path::Path;

use rand::Rng;
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Node mapping
// ---------------------------------------------------------------------------

/// Node ids (and input field names) that job parameters are injected into.
///
/// Defaults match the bundled LTXV image-to-video workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowNodes {
    /// Image loader node (required).
    pub image_input: String,
    /// Input field on the image loader that takes the staged file name.
    pub image_field: String,
    pub positive_prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: String,
    /// `seed` for KSampler, `noise_seed` for SamplerCustom.
    pub seed_field: String,
    /// Node whose `filename_prefix` is pointed at a per-job path.
    pub output: Option<String>,
}

impl Default for WorkflowNodes {
    fn default() -> Self {
        Self {
            image_input: "240".into(),
            image_field: "image".into(),
            positive_prompt: "6".into(),
            negative_prompt: Some("7".into()),
            seed: "72".into(),
            seed_field: "seed".into(),
            output: Some("241".into()),
        }
    }
}

/// Per-job values substituted into the template.
#[derive(Debug, Clone)]
pub struct RenderParams<'a> {
    /// File name returned by the backend when the input image was staged.
    pub image_name: &'a str,
    /// Injected only when present and non-empty.
    pub prompt: Option<&'a str>,
    /// Injected only when present.
    pub negative_prompt: Option<&'a str>,
    pub seed: u64,
    pub output_prefix: &'a str,
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
    nodes: WorkflowNodes,
}

impl WorkflowTemplate {
    /// Build a template, checking the graph shape and the image node.
    pub fn new(graph: Value, nodes: WorkflowNodes) -> Result<Self, CoreError> {
        let obj = graph.as_object().ok_or_else(|| {
            CoreError::Validation("Workflow JSON must be an object of nodes".to_string())
        })?;
        if obj.is_empty() {
            return Err(CoreError::Validation(
                "Workflow contains no nodes".to_string(),
            ));
        }
        for (id, node) in obj {
            let Some(node) = node.as_object() else {
                return Err(CoreError::Validation(format!(
                    "Workflow node '{id}' is not an object"
                )));
            };
            if !node.get("inputs").is_some_and(Value::is_object) {
                return Err(CoreError::Validation(format!(
                    "Workflow node '{id}' has no 'inputs' object"
                )));
            }
        }
        if !obj.contains_key(&nodes.image_input) {
            return Err(CoreError::Validation(format!(
                "Image input node '{}' not found in workflow",
                nodes.image_input
            )));
        }
        Ok(Self { graph, nodes })
    }

    /// Load a template from a JSON file.
    pub fn from_file(path: &Path, nodes: WorkflowNodes) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Failed to read workflow {}: {e}", path.display()))
        })?;
        let graph: Value = serde_json::from_str(&raw).map_err(|e| {
            CoreError::Validation(format!("Invalid workflow JSON in {}: {e}", path.display()))
        })?;
        Self::new(graph, nodes)
    }

    pub fn nodes(&self) -> &WorkflowNodes {
        &self.nodes
    }

    /// Produce a submit-ready graph for one job.
    pub fn render(&self, params: &RenderParams<'_>) -> Value {
        let mut graph = self.graph.clone();
        let nodes = &self.nodes;

        inject(
            &mut graph,
            &nodes.image_input,
            &nodes.image_field,
            Value::from(params.image_name),
        );

        if let Some(prompt) = params.prompt.filter(|p| !p.is_empty()) {
            inject(&mut graph, &nodes.positive_prompt, "text", Value::from(prompt));
        }

        if let (Some(negative), Some(node)) = (params.negative_prompt, &nodes.negative_prompt) {
            inject(&mut graph, node, "text", Value::from(negative));
        }

        inject(
            &mut graph,
            &nodes.seed,
            &nodes.seed_field,
            Value::from(params.seed),
        );

        if let Some(node) = &nodes.output {
            inject(
                &mut graph,
                node,
                "filename_prefix",
                Value::from(params.output_prefix),
            );
        }

        graph
    }
}

/// Use the caller's seed, or draw one in `1..2^63`.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::rng().random_range(1..(1u64 << 63)))
}

/// Every node has an `inputs` object once the template is built.
fn inject(graph: &mut Value, node_id: &str, field: &str, value: Value) {
    let Some(inputs) = graph
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    else {
        tracing::warn!(node_id, field, "Workflow node not found, skipping injection");
        return;
    };
    inputs.insert(field.to_string(), value);
}
