use std::path::PathBuf;
use std::time::Duration;

use relay_core::workflow::WorkflowNodes;

/// Timing and naming knobs for [`WorkerLoop`](crate::worker_loop::WorkerLoop).
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Sleep between backend status polls for the current job.
    pub backend_poll_interval: Duration,
    /// Hard ceiling for one job, from staging to fetching the output.
    pub job_timeout: Duration,
    /// Output files land under `{output_prefix}/{job_id}`.
    pub output_prefix: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            backend_poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(600),
            output_prefix: "td_output".into(),
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a worker on the same host as the
/// broker and ComfyUI.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Broker base URL (used by the standalone worker only).
    pub broker_url: String,
    pub comfyui_url: String,
    /// ComfyUI's input directory, for workflows that load images by path.
    pub comfyui_input_dir: Option<PathBuf>,
    pub workflow_path: PathBuf,
    pub nodes: WorkflowNodes,
    pub settings: LoopSettings,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                                  |
    /// |----------------------------|------------------------------------------|
    /// | `BROKER_URL`               | `http://127.0.0.1:8080`                  |
    /// | `COMFYUI_URL`              | `http://127.0.0.1:8111`                  |
    /// | `COMFYUI_INPUT_DIR`        | unset                                    |
    /// | `WORKER_POLL_INTERVAL_MS`  | `500`                                    |
    /// | `COMFYUI_POLL_INTERVAL_MS` | `1000`                                   |
    /// | `JOB_TIMEOUT_SECS`         | `600`                                    |
    /// | `WORKFLOW_PATH`            | `workflows/ltxv_image_to_video.json`     |
    /// | `WORKFLOW_NODE_IMAGE`      | `240`                                    |
    /// | `WORKFLOW_IMAGE_FIELD`     | `image`                                  |
    /// | `WORKFLOW_NODE_POSITIVE`   | `6`                                      |
    /// | `WORKFLOW_NODE_NEGATIVE`   | `7` (empty disables injection)           |
    /// | `WORKFLOW_NODE_SEED`       | `72`                                     |
    /// | `WORKFLOW_SEED_FIELD`      | `seed`                                   |
    /// | `WORKFLOW_NODE_OUTPUT`     | `241` (empty disables injection)         |
    /// | `OUTPUT_PREFIX`            | `td_output`                              |
    pub fn from_env() -> Self {
        let defaults = WorkflowNodes::default();

        let broker_url = env_or("BROKER_URL", "http://127.0.0.1:8080");
        let comfyui_url = env_or("COMFYUI_URL", "http://127.0.0.1:8111");
        let comfyui_input_dir = optional_env("COMFYUI_INPUT_DIR").map(PathBuf::from);

        let poll_interval_ms: u64 = env_or("WORKER_POLL_INTERVAL_MS", "500")
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let backend_poll_interval_ms: u64 = env_or("COMFYUI_POLL_INTERVAL_MS", "1000")
            .parse()
            .expect("COMFYUI_POLL_INTERVAL_MS must be a valid u64");

        let job_timeout_secs: u64 = env_or("JOB_TIMEOUT_SECS", "600")
            .parse()
            .expect("JOB_TIMEOUT_SECS must be a valid u64");

        let workflow_path =
            PathBuf::from(env_or("WORKFLOW_PATH", "workflows/ltxv_image_to_video.json"));

        let nodes = WorkflowNodes {
            image_input: env_or("WORKFLOW_NODE_IMAGE", &defaults.image_input),
            image_field: env_or("WORKFLOW_IMAGE_FIELD", &defaults.image_field),
            positive_prompt: env_or("WORKFLOW_NODE_POSITIVE", &defaults.positive_prompt),
            negative_prompt: optional_node("WORKFLOW_NODE_NEGATIVE", defaults.negative_prompt),
            seed: env_or("WORKFLOW_NODE_SEED", &defaults.seed),
            seed_field: env_or("WORKFLOW_SEED_FIELD", &defaults.seed_field),
            output: optional_node("WORKFLOW_NODE_OUTPUT", defaults.output),
        };

        Self {
            broker_url,
            comfyui_url,
            comfyui_input_dir,
            workflow_path,
            nodes,
            settings: LoopSettings {
                poll_interval: Duration::from_millis(poll_interval_ms),
                backend_poll_interval: Duration::from_millis(backend_poll_interval_ms),
                job_timeout: Duration::from_secs(job_timeout_secs),
                output_prefix: env_or("OUTPUT_PREFIX", "td_output"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset keeps the default; set-but-empty disables the node.
fn optional_node(key: &str, default: Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(v.trim().to_string()),
        Err(_) => default,
    }
}
