// crates/server/src/jobs/store.rs
//! The job store: an injectable object owning the in-memory job map, with
//! a best-effort durable mirror behind it.
//!
//! The in-memory map is the single source of truth while a job is
//! resident. Mirror writes are fire-and-forget by design — the batch
//! pipeline's liveness must never depend on durable-store availability,
//! so persistence failures are logged and swallowed. The cost is losing
//! history across restarts when the mirror is down; the contract holds
//! within one process's lifetime regardless.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::SecondsFormat;
use tracing::{error, warn};

use tracedeck_db::{Database, JobRow};

use super::types::{Job, JobPatch, JobStatus, JobType};

/// Sentinel error for user cancellation. The pipeline re-reads job status
/// between slices; this is how a cancel request reaches it.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Persisted traces are capped here. Outcome entries are the resume
/// ledger and are never dropped; the oldest info/warn/error entries are
/// evicted first when a long-resumed job overruns the cap.
const MAX_TRACE_EVENTS: usize = 10_000;

/// How many archive rows to pull into a merged list view.
const ARCHIVE_LIST_FETCH: u32 = 200;

/// Filter for [`JobStore::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub limit: usize,
}

/// In-memory job map plus optional durable mirror.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    archive: Option<Database>,
}

impl JobStore {
    /// `archive: None` runs fully in-memory — the store must behave
    /// identically apart from restart durability.
    pub fn new(archive: Option<Database>) -> Self {
        Self { jobs: RwLock::new(HashMap::new()), archive }
    }

    /// Allocate a fresh job: pending, empty progress/result. The mirror
    /// write is spawned, not awaited.
    pub fn create_job(&self, job_type: JobType, params: Option<serde_json::Value>) -> Job {
        let job = Job::new(job_type, params);
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(job.id.clone(), job.clone());
            }
            Err(e) => error!("job map lock poisoned on create: {e}"),
        }
        self.persist(job.clone());
        job
    }

    /// Shallow-merge a patch into the job, stamping `updatedAt`.
    ///
    /// Falls back to fetch-merge-write against the mirror when the job is
    /// not resident (e.g. resuming after a restart). Never fails on
    /// persistence problems — job progress must not block the pipeline.
    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Option<Job> {
        let mut updated = match self.jobs.write() {
            Ok(mut jobs) => jobs.get_mut(id).map(|job| {
                job.apply(patch.clone());
                cap_trace(job);
                job.clone()
            }),
            Err(e) => {
                error!("job map lock poisoned on update: {e}");
                None
            }
        };

        if updated.is_none() {
            if let Some(mut job) = self.fetch_from_archive(id).await {
                job.apply(patch);
                cap_trace(&mut job);
                if let Ok(mut jobs) = self.jobs.write() {
                    jobs.insert(id.to_string(), job.clone());
                }
                updated = Some(job);
            }
        }

        if let Some(job) = &updated {
            self.persist(job.clone());
        }
        updated
    }

    /// Memory first, mirror fallback.
    pub async fn get_job(&self, id: &str) -> Option<Job> {
        let resident = match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                error!("job map lock poisoned on get: {e}");
                None
            }
        };
        match resident {
            Some(job) => Some(job),
            None => self.fetch_from_archive(id).await,
        }
    }

    /// Merged in-memory + mirror view; memory wins on conflict. Sorted by
    /// creation time descending, truncated to the filter limit.
    pub async fn list_jobs(&self, filter: JobFilter) -> Vec<Job> {
        let mut merged: HashMap<String, Job> = HashMap::new();

        if let Some(db) = &self.archive {
            match db.list_jobs(ARCHIVE_LIST_FETCH).await {
                Ok(rows) => {
                    for row in rows {
                        if let Some(job) = decode_row(&row) {
                            merged.insert(job.id.clone(), job);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "job archive list failed, using memory only"),
            }
        }

        match self.jobs.read() {
            Ok(jobs) => {
                for job in jobs.values() {
                    merged.insert(job.id.clone(), job.clone());
                }
            }
            Err(e) => error!("job map lock poisoned on list: {e}"),
        }

        let mut jobs: Vec<Job> = merged
            .into_values()
            .filter(|j| filter.job_type.is_none_or(|t| j.job_type == t))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(filter.limit.max(1));
        jobs
    }

    /// Cooperative cancellation: flip the job to failed with the sentinel
    /// error. The running pipeline notices before its next slice.
    pub async fn cancel_job(&self, id: &str) -> Option<Job> {
        self.update_job(
            id,
            JobPatch::new().status(JobStatus::Failed).error(CANCELLED_BY_USER),
        )
        .await
    }

    async fn fetch_from_archive(&self, id: &str) -> Option<Job> {
        let db = self.archive.as_ref()?;
        match db.get_job(id).await {
            Ok(row) => row.as_ref().and_then(decode_row),
            Err(e) => {
                warn!(job_id = %id, error = %e, "job archive read failed");
                None
            }
        }
    }

    /// Fire-and-forget mirror write.
    fn persist(&self, job: Job) {
        let Some(db) = self.archive.clone() else { return };
        tokio::spawn(async move {
            let row = encode_row(&job);
            if let Err(e) = db.upsert_job(&row).await {
                warn!(job_id = %job.id, error = %e, "job archive write failed (non-fatal)");
            }
        });
    }

    /// Test hook: place a job into the map as-is, without stamping
    /// timestamps or touching the mirror.
    #[cfg(test)]
    pub(crate) fn inject_job(&self, job: Job) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.insert(job.id.clone(), job);
        }
    }
}

fn encode_row(job: &Job) -> JobRow {
    JobRow {
        id: job.id.clone(),
        job_type: job.job_type.as_str().to_string(),
        status: job.status.as_str().to_string(),
        payload: serde_json::to_string(job).unwrap_or_else(|e| {
            error!(job_id = %job.id, error = %e, "job serialization failed");
            String::from("{}")
        }),
        created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        updated_at: job.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

fn decode_row(row: &JobRow) -> Option<Job> {
    match serde_json::from_str(&row.payload) {
        Ok(job) => Some(job),
        Err(e) => {
            warn!(job_id = %row.id, error = %e, "undecodable job payload in archive");
            None
        }
    }
}

/// Enforce [`MAX_TRACE_EVENTS`], evicting oldest non-outcome entries
/// first. Outcome entries survive because resume depends on them.
fn cap_trace(job: &mut Job) {
    let Some(result) = job.result.as_mut() else { return };
    let overflow = result.trace.len().saturating_sub(MAX_TRACE_EVENTS);
    if overflow == 0 {
        return;
    }

    let mut to_drop = overflow;
    result.trace.retain(|event| {
        if to_drop > 0 && !event.is_outcome() {
            to_drop -= 1;
            false
        } else {
            true
        }
    });
    // All remaining entries are outcomes — truncate from the front as a
    // last resort so the cap actually holds. This weakens the resume
    // ledger for the dropped items, so it gets a warning.
    if result.trace.len() > MAX_TRACE_EVENTS {
        let excess = result.trace.len() - MAX_TRACE_EVENTS;
        result.trace.drain(..excess);
        warn!(job_id = %job.id, dropped = excess, "trace cap dropped outcome entries");
    }
}
