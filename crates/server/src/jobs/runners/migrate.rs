// crates/server/src/jobs/runners/migrate.rs
//! Tag migration: records whose reasoning is still embedded in the answer
//! as `<think>` tags get it lifted into the reasoning field. Pure
//! repository transformation, no provider.

use std::collections::HashSet;

use tracedeck_core::parsing::split_think_tags;
use tracedeck_core::record::TraceRecord;
use tracedeck_core::store::RecordContentPatch;

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
        "migrating embedded reasoning in {} items ({} already done)",
        items.len(),
        processed.len()
    )));
    let progress = JobProgress::resumed(JobType::MigrateReasoning, total, processed.len() as u64);
    let tunables = params.tunables();

    let process = |record: TraceRecord| {
        let records = deps.records.clone();
        async move {
            let item_id = record.id.clone();
            let Some(patch) = migration_patch(&record) else {
                return ItemReport::skipped(item_id, "no embedded reasoning to migrate");
            };
            match records.update_content(&item_id, &patch).await {
                Ok(()) => ItemReport::success(item_id, Some("migrated".into())),
                Err(e) => ItemReport::errored(item_id, format!("migration write-back failed: {e}")),
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}

/// Compute the migration for one record, or `None` when there is nothing
/// to do: no tags in the answer text, or the reasoning field is already
/// populated (migrating over it would destroy data).
fn migration_patch(record: &TraceRecord) -> Option<RecordContentPatch> {
    if record.reasoning.as_deref().is_some_and(|r| !r.trim().is_empty()) {
        return None;
    }

    if let Some(messages) = &record.messages {
        let last_assistant = messages.iter().rposition(|t| t.role == "assistant")?;
        let split = split_think_tags(&messages[last_assistant].content);
        if !split.has_think_tags || split.reasoning.is_empty() {
            return None;
        }
        let mut rewritten = messages.clone();
        rewritten[last_assistant].content = split.answer;
        return Some(RecordContentPatch {
            reasoning: Some(split.reasoning),
            messages: Some(rewritten),
            ..Default::default()
        });
    }

    let answer = record.answer.as_deref()?;
    let split = split_think_tags(answer);
    if !split.has_think_tags || split.reasoning.is_empty() {
        return None;
    }
    Some(RecordContentPatch {
        reasoning: Some(split.reasoning),
        answer: Some(split.answer),
        ..Default::default()
    })
}
