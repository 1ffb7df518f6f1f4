// crates/server/src/jobs/runners/orphan.rs
//! Orphan handling: records whose session row is missing.
//!
//! `orphan-check` reports them (the trace is the report); `orphan-sync`
//! repairs referential integrity by recreating the missing session rows.
//! Destroying orphans is deliberately not this runner's business — that is
//! what remove-items is for.

use std::collections::HashSet;

use tracedeck_core::record::TraceRecord;

use crate::jobs::pipeline::{run_batch, ItemReport};
use crate::jobs::types::{JobProgress, JobType, TraceEvent};

use super::{fail_job, JobParams, RunnerDeps, PAGE_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Check,
    Sync,
}

pub(super) async fn run(
    deps: &RunnerDeps,
    job_id: &str,
    params: &JobParams,
    processed: HashSet<String>,
    mut trace: Vec<TraceEvent>,
    mode: Mode,
) {
    let limit = params.limit.unwrap_or(PAGE_LIMIT).min(PAGE_LIMIT);
    let orphans = match deps.records.list_orphans(limit).await {
        Ok(orphans) => orphans,
        Err(e) => {
            return fail_job(&deps.jobs, job_id, trace, format!("orphan scan failed: {e}")).await
        }
    };
    let items: Vec<TraceRecord> =
        orphans.into_iter().filter(|r| !processed.contains(&r.id)).collect();

    let job_type = match mode {
        Mode::Check => JobType::OrphanCheck,
        Mode::Sync => JobType::OrphanSync,
    };
    let total = processed.len() as u64 + items.len() as u64;
    trace.push(TraceEvent::info(match mode {
        Mode::Check => format!("found {} orphaned records", items.len()),
        Mode::Sync => format!("repairing sessions for {} orphaned records", items.len()),
    }));
    let progress = JobProgress::resumed(job_type, total, processed.len() as u64);
    let tunables = params.tunables();

    let process = |record: TraceRecord| {
        let records = deps.records.clone();
        async move {
            match mode {
                Mode::Check => ItemReport::success(
                    record.id,
                    Some(format!("session {} missing", record.session_id)),
                ),
                Mode::Sync => {
                    match records.create_session(&record.session_id, "recovered").await {
                        Ok(()) => ItemReport::success(
                            record.id,
                            Some(format!("session {} recreated", record.session_id)),
                        ),
                        Err(e) => ItemReport::errored(
                            record.id,
                            format!("session repair failed: {e}"),
                        ),
                    }
                }
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}
