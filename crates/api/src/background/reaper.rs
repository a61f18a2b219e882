//! Periodic expiry and retention for the job table.
//!
//! Every tick moves queued/running jobs older than the max age to `error`
//! (with a `timeout` message) and drops finished jobs past retention.
//! Runs on a fixed interval using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use relay_core::store::JobStore;
use tokio_util::sync::CancellationToken;

/// Shortest tick the reaper will run at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub max_age: Duration,
    pub retention: Duration,
}

/// One reaper pass. Returns `(expired, purged)`.
pub async fn reap(store: &JobStore, settings: &ReaperSettings) -> (usize, usize) {
    let expired = store.sweep_expired(settings.max_age).await;
    for id in &expired {
        tracing::warn!(
            job_id = %id,
            max_age_secs = settings.max_age.as_secs(),
            "Job expired",
        );
    }

    let purged = store.purge_finished(settings.retention).await;
    if purged > 0 {
        tracing::info!(purged, "Reaper: dropped finished jobs past retention");
    } else {
        tracing::debug!("Reaper: nothing to purge");
    }

    (expired.len(), purged)
}

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(store: Arc<JobStore>, settings: ReaperSettings, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = settings.interval.as_secs(),
        max_age_secs = settings.max_age.as_secs(),
        retention_secs = settings.retention.as_secs(),
        "Job reaper started"
    );

    // `interval` panics on a zero period.
    let mut interval = tokio::time::interval(settings.interval.max(MIN_INTERVAL));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job reaper stopping");
                break;
            }
            _ = interval.tick() => {
                reap(&store, &settings).await;
            }
        }
    }
}
