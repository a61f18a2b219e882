//! In-memory job table.
//!
//! [`JobStore`] is the only place a [`Job`] is mutated. Every operation
//! takes the table lock exactly once, so check-then-set sequences
//! (claim, complete, fail, sweep) are indivisible with respect to each
//! other. Jobs are kept in insertion order, which is also creation order.

use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::job::{Job, JobOutput, JobStatus, JobSummary, NewJob, StatusCounts};
use crate::types::{new_job_id, JobId, Timestamp};

/// Prefix of every error message written by an expiry.
pub const TIMEOUT_MESSAGE_PREFIX: &str = "timeout";

/// Thread-safe job table; wrap in `Arc` to share between handlers and tasks.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<IndexMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `queued` job.
    pub async fn create(&self, input: NewJob) -> JobSummary {
        let mut jobs = self.jobs.write().await;
        let job = Job::queued(new_job_id(), input, Utc::now());
        let summary = job.summary();
        jobs.insert(job.id, job);
        summary
    }

    /// Claim the oldest `queued` job, moving it to `running`.
    ///
    /// Returns a snapshot of the claimed job, or `None` if nothing is queued.
    pub async fn claim_next(&self) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .values_mut()
            .find(|job| job.status == JobStatus::Queued)?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Move a `running` job to `done` with its output.
    pub async fn complete(&self, id: JobId, output: JobOutput) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(CoreError::StaleJob { id })?;
        check_transition(job, JobStatus::Done)?;
        job.status = JobStatus::Done;
        job.finished_at = Some(Utc::now());
        job.result = Some(output);
        Ok(())
    }

    /// Move a `queued` or `running` job to `error`.
    pub async fn fail(&self, id: JobId, message: impl Into<String>) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(CoreError::StaleJob { id })?;
        check_transition(job, JobStatus::Error)?;
        mark_error(job, message.into(), Utc::now());
        Ok(())
    }

    /// Full snapshot of a job, payloads included.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Run `f` against a job under the read lock without copying it.
    pub async fn inspect<T>(&self, id: JobId, f: impl FnOnce(&Job) -> T) -> Option<T> {
        self.jobs.read().await.get(&id).map(f)
    }

    /// List jobs newest first, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<JobSummary> {
        self.jobs
            .read()
            .await
            .values()
            .rev()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .skip(offset)
            .take(limit)
            .map(Job::summary)
            .collect()
    }

    /// Remove a job regardless of status. Returns whether it existed.
    pub async fn delete(&self, id: JobId) -> bool {
        // shift_remove keeps the remaining jobs in creation order.
        self.jobs.write().await.shift_remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read().await;
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            counts.record(job.status);
        }
        counts
    }

    /// Expire stale jobs relative to the current time.
    pub async fn sweep_expired(&self, max_age: Duration) -> Vec<JobId> {
        self.sweep_expired_at(Utc::now(), max_age).await
    }

    /// Move every `queued` job older than `max_age` (by `created_at`) and
    /// every `running` job older than `max_age` (by `started_at`) to `error`.
    ///
    /// Returns the ids that were expired.
    pub async fn sweep_expired_at(&self, now: Timestamp, max_age: Duration) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let mut expired = Vec::new();

        for job in jobs.values_mut() {
            let since = match job.status {
                JobStatus::Queued => job.created_at,
                JobStatus::Running => job.started_at.unwrap_or(job.created_at),
                JobStatus::Done | JobStatus::Error => continue,
            };
            if age(now, since) > max_age {
                let message = format!(
                    "{TIMEOUT_MESSAGE_PREFIX}: job was {} for more than {}s",
                    job.status,
                    max_age.as_secs()
                );
                mark_error(job, message, now);
                expired.push(job.id);
            }
        }

        expired
    }

    /// Drop terminal jobs that finished more than `retention` ago.
    pub async fn purge_finished(&self, retention: Duration) -> usize {
        self.purge_finished_at(Utc::now(), retention).await
    }

    pub async fn purge_finished_at(&self, now: Timestamp, retention: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match (job.status.is_terminal(), job.finished_at) {
            (true, Some(finished)) => age(now, finished) <= retention,
            _ => true,
        });
        before - jobs.len()
    }
}

fn check_transition(job: &Job, to: JobStatus) -> Result<(), CoreError> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            id: job.id,
            from: job.status,
            to,
        })
    }
}

fn mark_error(job: &mut Job, message: String, now: Timestamp) {
    job.status = JobStatus::Error;
    job.finished_at = Some(now);
    job.error_message = Some(message);
}

/// Elapsed time since `since`; clock skew into the future counts as zero.
fn age(now: Timestamp, since: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;

    fn image_job(tag: u8) -> NewJob {
        NewJob {
            image: vec![0x89, b'P', b'N', b'G', tag],
            prompt: Some(format!("prompt {tag}")),
            ..NewJob::default()
        }
    }

    fn output(bytes: &[u8]) -> JobOutput {
        JobOutput {
            data: bytes.to_vec(),
            content_type: "video/mp4".into(),
        }
    }

    // -- create / claim -------------------------------------------------------

    #[tokio::test]
    async fn create_starts_queued() {
        let store = JobStore::new();
        let summary = store.create(image_job(1)).await;

        assert_eq!(summary.status, JobStatus::Queued);
        assert!(!summary.has_result);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn claim_next_is_fifo() {
        let store = JobStore::new();
        let a = store.create(image_job(1)).await.id;
        let b = store.create(image_job(2)).await.id;
        let c = store.create(image_job(3)).await.id;

        let claimed: Vec<JobId> = [
            store.claim_next().await.unwrap().id,
            store.claim_next().await.unwrap().id,
            store.claim_next().await.unwrap().id,
        ]
        .into();

        assert_eq!(claimed, vec![a, b, c]);
        assert!(store.claim_next().await.is_none());
    }

    #[tokio::test]
    async fn claim_sets_running_and_started_at() {
        let store = JobStore::new();
        store.create(image_job(1)).await;

        let job = store.claim_next().await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(job.input_image, vec![0x89, b'P', b'N', b'G', 1]);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_job() {
        let store = Arc::new(JobStore::new());
        for i in 0..50 {
            store.create(image_job(i)).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next().await {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn deleted_before_claim_is_never_claimed() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;

        assert!(store.delete(id).await);
        assert!(store.claim_next().await.is_none());
    }

    // -- complete / fail ------------------------------------------------------

    #[tokio::test]
    async fn complete_stores_result() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();

        store.complete(id, output(b"V")).await.unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(output(b"V")));
        assert!(job.finished_at.is_some());
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn complete_queued_job_is_invalid_transition() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;

        let err = store.complete(id, output(b"V")).await.unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Done,
                ..
            }
        );
    }

    #[tokio::test]
    async fn complete_missing_job_is_stale() {
        let store = JobStore::new();
        let id = new_job_id();

        let err = store.complete(id, output(b"V")).await.unwrap_err();
        assert_matches!(err, CoreError::StaleJob { id: stale } if stale == id);
    }

    #[tokio::test]
    async fn complete_after_delete_is_stale() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();
        store.delete(id).await;

        let err = store.complete(id, output(b"V")).await.unwrap_err();
        assert!(err.is_stale());
    }

    #[tokio::test]
    async fn fail_queued_job_is_allowed() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;

        store.fail(id, "could not stage input").await.unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("could not stage input"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_cannot_be_resurrected() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();
        store.complete(id, output(b"V")).await.unwrap();

        assert_matches!(
            store.fail(id, "late").await,
            Err(CoreError::InvalidTransition { from: JobStatus::Done, .. })
        );
        assert_matches!(
            store.complete(id, output(b"W")).await,
            Err(CoreError::InvalidTransition { from: JobStatus::Done, .. })
        );
        assert_eq!(store.get(id).await.unwrap().result, Some(output(b"V")));
    }

    // -- list / delete --------------------------------------------------------

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = JobStore::new();
        let ids: Vec<JobId> = {
            let mut ids = Vec::new();
            for i in 0..5 {
                ids.push(store.create(image_job(i)).await.id);
            }
            ids
        };

        let page: Vec<JobId> = store.list(None, 2, 0).await.iter().map(|j| j.id).collect();
        assert_eq!(page, vec![ids[4], ids[3]]);

        let page: Vec<JobId> = store.list(None, 2, 2).await.iter().map(|j| j.id).collect();
        assert_eq!(page, vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = JobStore::new();
        let first = store.create(image_job(1)).await.id;
        store.create(image_job(2)).await;
        store.claim_next().await.unwrap();

        let running = store.list(Some(JobStatus::Running), 10, 0).await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, first);

        let queued = store.list(Some(JobStatus::Queued), 10, 0).await;
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn delete_twice_reports_existed_then_missing() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;

        assert!(store.delete(id).await);
        assert!(!store.delete(id).await);
    }

    #[tokio::test]
    async fn delete_keeps_creation_order() {
        let store = JobStore::new();
        let a = store.create(image_job(1)).await.id;
        let b = store.create(image_job(2)).await.id;
        let c = store.create(image_job(3)).await.id;
        store.delete(b).await;

        assert_eq!(store.claim_next().await.unwrap().id, a);
        assert_eq!(store.claim_next().await.unwrap().id, c);
    }

    // -- sweep / purge --------------------------------------------------------

    #[tokio::test]
    async fn sweep_expires_old_queued_and_running_jobs() {
        let store = JobStore::new();
        let running = store.create(image_job(1)).await.id;
        let queued = store.create(image_job(2)).await.id;
        store.claim_next().await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        let mut expired = store.sweep_expired_at(later, Duration::from_secs(60)).await;
        expired.sort();
        let mut expected = vec![running, queued];
        expected.sort();
        assert_eq!(expired, expected);

        for id in [running, queued] {
            let job = store.get(id).await.unwrap();
            assert_eq!(job.status, JobStatus::Error);
            assert!(job
                .error_message
                .unwrap()
                .starts_with(TIMEOUT_MESSAGE_PREFIX));
        }
    }

    #[tokio::test]
    async fn sweep_leaves_young_and_terminal_jobs_alone() {
        let store = JobStore::new();
        let done = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();
        store.complete(done, output(b"V")).await.unwrap();
        let young = store.create(image_job(2)).await.id;

        let expired = store.sweep_expired(Duration::from_secs(60)).await;
        assert!(expired.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(120);
        let expired = store.sweep_expired_at(later, Duration::from_secs(60)).await;
        assert_eq!(expired, vec![young]);
        assert_eq!(store.get(done).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn sweep_does_not_reorder_listing() {
        let store = JobStore::new();
        for i in 0..3 {
            store.create(image_job(i)).await;
        }
        let before: Vec<JobId> = store.list(None, 10, 0).await.iter().map(|j| j.id).collect();

        let later = Utc::now() + chrono::Duration::seconds(120);
        store.sweep_expired_at(later, Duration::from_secs(60)).await;

        let after: Vec<JobId> = store.list(None, 10, 0).await.iter().map(|j| j.id).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn complete_racing_sweep_keeps_first_writer() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        store.sweep_expired_at(later, Duration::from_secs(60)).await;
        let late = store.complete(id, output(b"V")).await;

        assert_matches!(late, Err(ref e) if e.is_stale());
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn sweep_after_complete_changes_nothing() {
        let store = JobStore::new();
        let id = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();
        store.complete(id, output(b"V")).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(store
            .sweep_expired_at(later, Duration::from_secs(60))
            .await
            .is_empty());
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn concurrent_complete_and_sweep_leave_one_terminal_state() {
        for _ in 0..20 {
            let store = Arc::new(JobStore::new());
            let id = store.create(image_job(1)).await.id;
            store.claim_next().await.unwrap();
            let later = Utc::now() + chrono::Duration::seconds(120);

            let completer = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.complete(id, output(b"V")).await })
            };
            let sweeper = {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.sweep_expired_at(later, Duration::from_secs(60)).await
                })
            };

            let completed = completer.await.unwrap();
            let swept = sweeper.await.unwrap();
            let job = store.get(id).await.unwrap();

            match job.status {
                JobStatus::Done => {
                    assert!(completed.is_ok());
                    assert!(swept.is_empty());
                    assert!(job.error_message.is_none());
                }
                JobStatus::Error => {
                    assert!(completed.unwrap_err().is_stale());
                    assert_eq!(swept, vec![id]);
                    assert!(job.result.is_none());
                }
                other => panic!("unexpected status {other}"),
            }
        }
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_jobs() {
        let store = JobStore::new();
        let done = store.create(image_job(1)).await.id;
        store.claim_next().await.unwrap();
        store.complete(done, output(b"V")).await.unwrap();
        let queued = store.create(image_job(2)).await.id;

        assert_eq!(store.purge_finished(Duration::from_secs(60)).await, 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(
            store.purge_finished_at(later, Duration::from_secs(60)).await,
            1
        );
        assert!(store.get(done).await.is_none());
        assert!(store.get(queued).await.is_some());
    }

    #[tokio::test]
    async fn counts_per_status() {
        let store = JobStore::new();
        let a = store.create(image_job(1)).await.id;
        store.create(image_job(2)).await;
        store.create(image_job(3)).await;
        store.claim_next().await.unwrap();
        store.complete(a, output(b"V")).await.unwrap();
        store.claim_next().await.unwrap();

        let counts = store.counts().await;
        assert_eq!(
            counts,
            StatusCounts {
                queued: 1,
                running: 1,
                done: 1,
                error: 0,
            }
        );
        assert_eq!(counts.total(), 3);
    }
}
