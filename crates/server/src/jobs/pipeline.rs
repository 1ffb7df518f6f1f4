// crates/server/src/jobs/pipeline.rs
//! The generic batch shape every job runner instantiates.
//!
//! Items are partitioned into consecutive slices of `concurrency` size.
//! Within a slice all items run concurrently and are settled together —
//! one item's failure never aborts its siblings. Between slices the job's
//! status is re-read from the store, which is where a concurrently issued
//! cancel lands: already-in-flight calls finish naturally and their
//! outcomes are recorded, but no further slice starts.
//!
//! Two retry policies exist on purpose and must not be unified:
//! - [`retry_fixed`] — fixed-delay per-item retry used inside batch
//!   slices, where predictable bounded latency matters.
//! - The provider client's exponential connect backoff, where an
//!   interactive caller tolerates longer waits.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info};

use tracedeck_core::error::ProviderError;

use super::store::JobStore;
use super::types::{ItemOutcome, JobPatch, JobProgress, JobResult, JobStatus, TraceEvent};

pub const DEFAULT_CONCURRENCY: usize = 1;
/// Hard upper bound enforced at the request boundary.
pub const MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 500;

/// Per-run knobs, clamped to sane ranges on construction.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Outstanding provider calls per slice.
    pub concurrency: usize,
    /// Per-item retry attempts after the first try.
    pub max_retries: u32,
    /// Fixed (not exponential) wait between per-item attempts.
    pub retry_delay: Duration,
    /// Rate-limiting pause between consecutive slices.
    pub batch_delay: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
        }
    }
}

impl Tunables {
    pub fn resolve(
        concurrency: Option<usize>,
        max_retries: Option<u32>,
        retry_delay_ms: Option<u64>,
        batch_delay_ms: Option<u64>,
    ) -> Self {
        Self {
            concurrency: concurrency
                .unwrap_or(DEFAULT_CONCURRENCY)
                .clamp(1, MAX_CONCURRENCY),
            max_retries: max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            batch_delay: Duration::from_millis(batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS)),
        }
    }
}

/// What one item's processing reported back.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item_id: String,
    pub outcome: ItemOutcome,
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn success(item_id: impl Into<String>, detail: Option<String>) -> Self {
        Self { item_id: item_id.into(), outcome: ItemOutcome::Success, detail }
    }

    pub fn skipped(item_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), outcome: ItemOutcome::Skipped, detail: Some(detail.into()) }
    }

    pub fn errored(item_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), outcome: ItemOutcome::Errored, detail: Some(detail.into()) }
    }
}

/// How a batch run ended.
#[derive(Debug)]
pub struct BatchSummary {
    pub cancelled: bool,
    pub progress: JobProgress,
}

/// Drive a full batch over `items`.
///
/// `progress` and `trace` are the starting baselines — zeroed for a fresh
/// run, carried forward for a resume. After every slice the counters and
/// the *full* trace are written back, so pollers see accurate mid-run
/// state. Within a slice, outcomes land in issue order (join_all keeps
/// pairing stable); wall-clock completion order across a slice is
/// unspecified.
pub async fn run_batch<I, F, Fut>(
    store: &JobStore,
    job_id: &str,
    items: Vec<I>,
    tunables: &Tunables,
    mut progress: JobProgress,
    mut trace: Vec<TraceEvent>,
    process: F,
) -> BatchSummary
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = ItemReport>,
{
    let total = progress.total();
    store
        .update_job(
            job_id,
            JobPatch::new()
                .status(JobStatus::Running)
                .progress(progress.clone())
                .result(JobResult::with_trace(trace.clone())),
        )
        .await;

    let mut remaining = items.into_iter();
    loop {
        let slice: Vec<I> = remaining.by_ref().take(tunables.concurrency).collect();
        if slice.is_empty() {
            break;
        }

        // Cancellation is cooperative: a cancel request flips the stored
        // status to failed between our suspension points, so trust the
        // store, not a value read at loop start.
        if let Some(job) = store.get_job(job_id).await {
            if job.status == JobStatus::Failed {
                trace.push(TraceEvent::warn(format!(
                    "{} at item {}/{}",
                    job.error.as_deref().unwrap_or("cancelled"),
                    progress.current(),
                    total
                )));
                store
                    .update_job(
                        job_id,
                        JobPatch::new()
                            .progress(progress.clone())
                            .result(JobResult::with_trace(trace.clone())),
                    )
                    .await;
                info!(job_id, at = progress.current(), "batch stopped by cancellation");
                return BatchSummary { cancelled: true, progress };
            }
        }

        // Settle-all: every item in the slice reports an outcome; nothing
        // here can abort a sibling.
        let reports = join_all(slice.into_iter().map(&process)).await;
        for report in reports {
            debug!(job_id, item = %report.item_id, outcome = ?report.outcome, "item settled");
            progress.bump(report.outcome);
            trace.push(TraceEvent::outcome(report.item_id, report.outcome, report.detail));
        }

        let more_remaining = remaining.len() > 0;
        store
            .update_job(
                job_id,
                JobPatch::new()
                    .progress(progress.clone())
                    .result(JobResult::with_trace(trace.clone())),
            )
            .await;

        if more_remaining && !tunables.batch_delay.is_zero() {
            tokio::time::sleep(tunables.batch_delay).await;
        }
    }

    trace.push(TraceEvent::info(format!(
        "completed: {}/{} items, {} succeeded, {} errors",
        progress.current(),
        total,
        progress.succeeded(),
        progress.error_count()
    )));
    store
        .update_job(
            job_id,
            JobPatch::new()
                .status(JobStatus::Completed)
                .progress(progress.clone())
                .result(JobResult::with_trace(trace)),
        )
        .await;
    BatchSummary { cancelled: false, progress }
}

/// Fixed-delay retry for the synchronous provider call one batch item
/// makes. Retries only errors the provider layer marks retryable (429,
/// 5xx, network); the delay does not grow between attempts.
pub async fn retry_fixed<T, F, Fut>(
    max_retries: u32,
    delay: Duration,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable() && attempt < max_retries => {
                attempt += 1;
                debug!(attempt, error = %e, "item call failed, retrying after fixed delay");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
