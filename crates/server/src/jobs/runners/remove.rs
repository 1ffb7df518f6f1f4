// crates/server/src/jobs/runners/remove.rs
//! Batch removal of records. No provider involved — this runner exists
//! so bulk deletes get the same trace ledger, cancellation and resume
//! semantics as everything else.

use std::collections::HashSet;

use tracedeck_core::record::TraceRecord;

use crate::jobs::pipeline::{run_batch, ItemReport};
use crate::jobs::types::{JobProgress, JobType, TraceEvent};

use super::{fail_job, resolve_items, JobParams, RunnerDeps};

pub(super) async fn run(
    deps: &RunnerDeps,
    job_id: &str,
    params: &JobParams,
    processed: HashSet<String>,
    mut trace: Vec<TraceEvent>,
) {
    let items = match resolve_items(deps, params, &processed).await {
        Ok(items) => items,
        Err(msg) => return fail_job(&deps.jobs, job_id, trace, msg).await,
    };

    let total = processed.len() as u64 + items.len() as u64;
    trace.push(TraceEvent::info(format!(
        "removing {} items ({} already done)",
        items.len(),
        processed.len()
    )));
    let progress = JobProgress::resumed(JobType::RemoveItems, total, processed.len() as u64);
    let tunables = params.tunables();

    let process = |record: TraceRecord| {
        let records = deps.records.clone();
        async move {
            match records.delete_record(&record.id).await {
                Ok(true) => ItemReport::success(record.id, Some("removed".into())),
                Ok(false) => ItemReport::skipped(record.id, "record already gone"),
                Err(e) => ItemReport::errored(record.id, format!("delete failed: {e}")),
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}
