//! Job record, lifecycle status, and the client-facing projections of it.
//!
//! [`Job`] is owned by the [`JobStore`](crate::store::JobStore); everything
//! outside the store only ever sees a snapshot or a [`JobSummary`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job lifecycle status.
///
/// Allowed paths: `queued -> running -> {done | error}` and
/// `queued -> error` (timeout or pre-claim failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// `done` and `error` are terminal; only deletion leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    /// Parse a lowercase status name as used in query strings.
    pub fn parse(s: &str) -> Option<JobStatus> {
        JobStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Parameters accepted at submission time.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub image: Vec<u8>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
}

/// Bytes produced by the backend together with their declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// A single unit of capture-to-render work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub input_image: Vec<u8>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    /// Present only while `status == Done`.
    pub result: Option<JobOutput>,
    /// Present only while `status == Error`.
    pub error_message: Option<String>,
}

impl Job {
    pub(crate) fn queued(id: JobId, input: NewJob, now: Timestamp) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            input_image: input.image,
            prompt: input.prompt,
            negative_prompt: input.negative_prompt,
            seed: input.seed,
            result: None,
            error_message: None,
        }
    }

    /// Seconds between start and finish, only once the job is terminal.
    pub fn processing_time(&self) -> Option<f64> {
        if !self.status.is_terminal() {
            return None;
        }
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            seed: self.seed,
            has_result: self.result.is_some(),
            error_message: self.error_message.clone(),
            processing_time: self.processing_time(),
        }
    }
}

/// Client-facing status view of a job. Never carries payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub has_result: bool,
    pub error_message: Option<String>,
    /// Seconds; `None` until the job is terminal.
    pub processing_time: Option<f64>,
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.done + self.error
    }

    pub(crate) fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Error => self.error += 1,
        }
    }
}

/// What a worker receives when it claims a job over the wire.
///
/// The input image travels separately (`GET /jobs/{id}/input`) so the
/// claim response stays small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub id: JobId,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
}

impl ClaimedJob {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            created_at: job.created_at,
            started_at: job.started_at,
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            seed: job.seed,
        }
    }

    /// Rebuild the running job on the worker side.
    pub fn into_job(self, input_image: Vec<u8>) -> Job {
        Job {
            id: self.id,
            status: JobStatus::Running,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: None,
            input_image,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            seed: self.seed,
            result: None,
            error_message: None,
        }
    }
}
