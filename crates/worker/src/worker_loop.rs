//! Long-running worker loop.
//!
//! Claims one job at a time from a [`JobQueue`], drives it through a
//! [`RenderBackend`] and writes the outcome back. Every claimed job ends
//! in a write-back: success, backend failure, budget timeout, panic and
//! shutdown all report through the same path. A result the queue refuses
//! to record is turned into a failure so the job never stays `running`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use relay_core::backend::{BackendStatus, ExecutionHandle, RenderBackend};
use relay_core::error::CoreError;
use relay_core::job::{Job, JobOutput};
use relay_core::media::image_extension;
use relay_core::queue::JobQueue;
use relay_core::store::TIMEOUT_MESSAGE_PREFIX;
use relay_core::types::JobId;
use relay_core::workflow::{resolve_seed, RenderParams, WorkflowTemplate};
use tokio_util::sync::CancellationToken;

use crate::config::LoopSettings;

/// Consecutive claim failures tolerated before backing off.
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 5;

/// Pause after [`MAX_CONSECUTIVE_SOURCE_ERRORS`] claim failures in a row.
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// Consecutive failed status polls tolerated for a single job.
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Attempts per write-back before giving up on a non-stale error.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Prefix of staged input file names; the job id and extension follow.
const INPUT_FILE_PREFIX: &str = "td_input";

pub struct WorkerLoop {
    queue: Arc<dyn JobQueue>,
    backend: Arc<dyn RenderBackend>,
    template: WorkflowTemplate,
    settings: LoopSettings,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        backend: Arc<dyn RenderBackend>,
        template: WorkflowTemplate,
        settings: LoopSettings,
    ) -> Self {
        Self {
            queue,
            backend,
            template,
            settings,
        }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// Claim errors never stop the loop. After
    /// [`MAX_CONSECUTIVE_SOURCE_ERRORS`] in a row it sleeps for
    /// [`SOURCE_ERROR_BACKOFF`] before trying again.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            job_timeout_secs = self.settings.job_timeout.as_secs(),
            "Worker loop started",
        );

        let mut source_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pause = match self.run_once(&cancel).await {
                // Processed a job: look for the next one right away.
                Ok(true) => {
                    source_errors = 0;
                    None
                }
                Ok(false) => {
                    source_errors = 0;
                    Some(self.settings.poll_interval)
                }
                Err(e) => {
                    source_errors += 1;
                    tracing::error!(
                        error = %e,
                        consecutive_errors = source_errors,
                        "Failed to claim job",
                    );
                    if source_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        tracing::warn!(
                            backoff_secs = SOURCE_ERROR_BACKOFF.as_secs(),
                            "Job source keeps failing, backing off",
                        );
                        source_errors = 0;
                        Some(SOURCE_ERROR_BACKOFF)
                    } else {
                        Some(self.settings.poll_interval)
                    }
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("Worker loop shutting down");
    }

    /// Claim and process at most one job.
    ///
    /// Returns `Ok(true)` if a job was claimed (whatever its outcome),
    /// `Ok(false)` if the queue was empty. Only claim errors are returned;
    /// processing failures are written back to the queue instead.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<bool, CoreError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };
        self.process(job, cancel).await;
        Ok(true)
    }

    async fn process(&self, job: Job, cancel: &CancellationToken) {
        let id = job.id;
        let started = Instant::now();
        tracing::info!(
            job_id = %id,
            input_bytes = job.input_image.len(),
            has_prompt = job.prompt.is_some(),
            "Processing job",
        );

        let outcome = tokio::select! {
            outcome = self.execute_guarded(&job) => outcome,
            _ = cancel.cancelled() => {
                Err("Worker shut down before the job finished".to_string())
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                tracing::info!(
                    job_id = %id,
                    elapsed_ms,
                    output_bytes = output.data.len(),
                    content_type = %output.content_type,
                    "Job completed",
                );
                self.record_success(id, output).await;
            }
            Err(message) => {
                tracing::warn!(job_id = %id, elapsed_ms, error = %message, "Job failed");
                self.record_failure(id, message).await;
            }
        }
    }

    /// Write back a result. If the queue keeps refusing it, the job is
    /// failed instead.
    async fn record_success(&self, id: JobId, output: JobOutput) {
        let mut attempt = 1;
        let err = loop {
            match self.queue.complete(id, output.clone()).await {
                Ok(()) => return,
                Err(e) if e.is_stale() => {
                    discard_stale(id, "complete", &e);
                    return;
                }
                Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                    self.retry_after_write_error(id, "complete", attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        tracing::error!(job_id = %id, error = %err, "Failed to record job result");
        self.record_failure(id, format!("Failed to record job result: {err}"))
            .await;
    }

    async fn record_failure(&self, id: JobId, message: String) {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.queue.fail(id, message.clone()).await {
                Ok(()) => return,
                Err(e) if e.is_stale() => {
                    discard_stale(id, "fail", &e);
                    return;
                }
                Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                    self.retry_after_write_error(id, "fail", attempt, &e).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %id,
                        error = %e,
                        "Failed to record job failure; the sweep will expire it",
                    );
                }
            }
        }
    }

    async fn retry_after_write_error(
        &self,
        id: JobId,
        action: &'static str,
        attempt: u32,
        err: &CoreError,
    ) {
        tracing::warn!(
            job_id = %id,
            action,
            attempt,
            error = %err,
            "Write-back failed, retrying",
        );
        tokio::time::sleep(self.settings.poll_interval).await;
    }

    /// [`execute`](Self::execute) bounded by the job budget, with panics
    /// turned into failure messages.
    async fn execute_guarded(&self, job: &Job) -> Result<JobOutput, String> {
        let budget = self.settings.job_timeout;
        let guarded = AssertUnwindSafe(self.execute(job)).catch_unwind();

        match tokio::time::timeout(budget, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(format!("Worker panicked: {}", panic_message(&*panic))),
            Err(_) => Err(format!(
                "{TIMEOUT_MESSAGE_PREFIX}: backend did not finish within {}s",
                budget.as_secs()
            )),
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobOutput, String> {
        let file_name = format!(
            "{INPUT_FILE_PREFIX}_{}.{}",
            job.id,
            image_extension(&job.input_image)
        );
        let staged = self
            .backend
            .stage_input(&file_name, job.input_image.clone())
            .await
            .map_err(|e| format!("Failed to stage input image: {e}"))?;

        let seed = resolve_seed(job.seed);
        let output_prefix = format!("{}/{}", self.settings.output_prefix, job.id);
        let workflow = self.template.render(&RenderParams {
            image_name: &staged,
            prompt: job.prompt.as_deref(),
            negative_prompt: job.negative_prompt.as_deref(),
            seed,
            output_prefix: &output_prefix,
        });

        let handle = self
            .backend
            .submit_workflow(&workflow)
            .await
            .map_err(|e| format!("ComfyUI submission failed: {e}"))?;
        tracing::info!(job_id = %job.id, prompt_id = %handle, seed, "Workflow submitted");

        self.wait_for_completion(job.id, &handle).await?;

        let output = self
            .backend
            .fetch_output(&handle)
            .await
            .map_err(|e| format!("Failed to fetch output: {e}"))?;
        if output.data.is_empty() {
            return Err("Backend returned an empty output".to_string());
        }
        Ok(output)
    }

    /// Poll until the backend reports a terminal status.
    ///
    /// Has no deadline of its own; `execute_guarded` enforces the budget.
    async fn wait_for_completion(&self, id: JobId, handle: &ExecutionHandle) -> Result<(), String> {
        let mut poll_errors = 0u32;

        loop {
            match self.backend.poll(handle).await {
                Ok(BackendStatus::Complete) => return Ok(()),
                Ok(BackendStatus::Failed(message)) => return Err(message),
                Ok(BackendStatus::Pending | BackendStatus::Running) => poll_errors = 0,
                Err(e) => {
                    poll_errors += 1;
                    tracing::warn!(
                        job_id = %id,
                        prompt_id = %handle,
                        error = %e,
                        consecutive_errors = poll_errors,
                        "Backend status poll failed",
                    );
                    if poll_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(format!("Lost contact with backend: {e}"));
                    }
                }
            }
            tokio::time::sleep(self.settings.backend_poll_interval).await;
        }
    }
}

/// Stale jobs (deleted or expired while we worked) are expected.
fn discard_stale(id: JobId, action: &'static str, err: &CoreError) {
    tracing::warn!(job_id = %id, action, error = %err, "Discarding outcome for stale job");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
