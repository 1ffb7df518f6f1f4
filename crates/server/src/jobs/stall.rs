// crates/server/src/jobs/stall.rs
//! Stall monitor: a periodic sweep, independent of request traffic, that
//! fails running jobs whose `updatedAt` stopped advancing — the owning
//! task died or hung, and the client should resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store::{JobFilter, JobStore};
use super::types::{JobPatch, JobStatus};

pub const STALL_THRESHOLD: Duration = Duration::from_secs(120);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How many running jobs one sweep looks at. Far above anything a single
/// process realistically runs.
const SWEEP_LIST_LIMIT: usize = 500;

/// Spawn the monitor with default interval and threshold.
pub fn spawn_stall_monitor(store: Arc<JobStore>) -> JoinHandle<()> {
    spawn_stall_monitor_with(store, SWEEP_INTERVAL, STALL_THRESHOLD)
}

/// Spawn with explicit timings (tests shrink them).
///
/// Each tick spawns the sweep as its own task behind an overlap guard: if
/// the previous sweep is still executing — a slow durable store can do
/// that — the new tick is skipped entirely rather than queued, so sweeps
/// never pile up.
pub fn spawn_stall_monitor_with(
    store: Arc<JobStore>,
    interval: Duration,
    threshold: Duration,
) -> JoinHandle<()> {
    let sweeping = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if sweeping.swap(true, Ordering::SeqCst) {
                debug!("previous stall sweep still running, skipping tick");
                continue;
            }
            let store = store.clone();
            let sweeping = sweeping.clone();
            tokio::spawn(async move {
                sweep(&store, threshold).await;
                sweeping.store(false, Ordering::SeqCst);
            });
        }
    })
}

/// One pass: fail every running job whose last update is older than the
/// threshold.
pub(crate) async fn sweep(store: &JobStore, threshold: Duration) {
    let running = store
        .list_jobs(JobFilter {
            status: Some(JobStatus::Running),
            limit: SWEEP_LIST_LIMIT,
            ..Default::default()
        })
        .await;

    let now = Utc::now();
    for job in running {
        let stalled_for = (now - job.updated_at).to_std().unwrap_or_default();
        if stalled_for < threshold {
            continue;
        }
        let secs = stalled_for.as_secs();
        warn!(job_id = %job.id, stalled_secs = secs, "marking stalled job failed");
        store
            .update_job(
                &job.id,
                JobPatch::new().status(JobStatus::Failed).error(format!(
                    "stalled: no progress for {secs}s; the job can be resumed"
                )),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{Job, JobType};
    use chrono::Duration as ChronoDuration;

    fn stale_running_job(age_secs: i64) -> Job {
        let mut job = Job::new(JobType::Score, None);
        job.status = JobStatus::Running;
        job.updated_at = Utc::now() - ChronoDuration::seconds(age_secs);
        job
    }

    #[tokio::test]
    async fn test_sweep_fails_stalled_job() {
        let store = JobStore::new(None);
        let job = stale_running_job(600);
        let id = job.id.clone();
        store.inject_job(job);

        sweep(&store, Duration::from_secs(120)).await;

        let failed = store.get_job(&id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let error = failed.error.unwrap();
        assert!(error.starts_with("stalled: no progress for"));
        assert!(error.contains("resumed"));
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_jobs_alone() {
        let store = JobStore::new(None);
        let job = stale_running_job(10);
        let id = job.id.clone();
        store.inject_job(job);

        sweep(&store, Duration::from_secs(120)).await;

        assert_eq!(store.get_job(&id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_sweep_ignores_terminal_jobs() {
        let store = JobStore::new(None);
        let mut job = stale_running_job(600);
        job.status = JobStatus::Completed;
        let id = job.id.clone();
        store.inject_job(job);

        sweep(&store, Duration::from_secs(120)).await;

        assert_eq!(store.get_job(&id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_monitor_task_marks_job_in_background() {
        let store = Arc::new(JobStore::new(None));
        let job = stale_running_job(600);
        let id = job.id.clone();
        store.inject_job(job);

        let handle = spawn_stall_monitor_with(
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(120),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get_job(&id).await.unwrap().status, JobStatus::Failed);
        handle.abort();
    }
}
