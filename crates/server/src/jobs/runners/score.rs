// crates/server/src/jobs/runners/score.rs
//! Batch scoring: one provider call per record, a JSON score extracted
//! from the response, the score written back to the repository.

use std::collections::HashSet;

use tracedeck_core::parsing::extract_json_fields;
use tracedeck_core::provider::ChatMessage;
use tracedeck_core::record::TraceRecord;

use crate::jobs::pipeline::{retry_fixed, run_batch, ItemReport};
use crate::jobs::types::{JobProgress, JobType, TraceEvent};

use super::{fail_job, resolve_items, JobParams, RunnerDeps};

const DEFAULT_PROMPT: &str = "Rate the quality of the reasoning trace below on a scale of 0 to 10. \
Consider correctness, completeness and clarity. \
Respond with a JSON object of the form {\"score\": <number>} and nothing else.";

pub(super) async fn run(
    deps: &RunnerDeps,
    job_id: &str,
    params: &JobParams,
    processed: HashSet<String>,
    mut trace: Vec<TraceEvent>,
    api_key: Option<String>,
) {
    let (config, options) = match params.provider_config(api_key) {
        Ok(pair) => pair,
        Err(msg) => return fail_job(&deps.jobs, job_id, trace, msg).await,
    };
    let items = match resolve_items(deps, params, &processed).await {
        Ok(items) => items,
        Err(msg) => return fail_job(&deps.jobs, job_id, trace, msg).await,
    };

    let total = processed.len() as u64 + items.len() as u64;
    trace.push(TraceEvent::info(format!(
        "scoring {} items with {} ({} already done)",
        items.len(),
        options.model,
        processed.len()
    )));
    let progress = JobProgress::resumed(JobType::Score, total, processed.len() as u64);
    let tunables = params.tunables();
    let prompt = params.prompt.as_deref().unwrap_or(DEFAULT_PROMPT).to_string();

    let process = |record: TraceRecord| {
        let client = deps.client.clone();
        let records = deps.records.clone();
        let config = config.clone();
        let options = options.clone();
        let prompt = prompt.clone();
        let max_retries = tunables.max_retries;
        let retry_delay = tunables.retry_delay;
        async move {
            let item_id = record.id.clone();
            let Some(body) = render_record(&record) else {
                return ItemReport::skipped(item_id, "record has no content to score");
            };
            let messages = vec![ChatMessage::user(format!("{prompt}\n\n{body}"))];

            let completion = retry_fixed(max_retries, retry_delay, || {
                client.complete(&config, &messages, &options)
            })
            .await;

            match completion {
                Ok(completion) => {
                    let extraction = extract_json_fields(&completion.content, &["score"]);
                    let Some(score) = extraction.data.and_then(|d| d["score"].as_f64()) else {
                        return ItemReport::skipped(item_id, "unparseable score response");
                    };
                    let score = score.round().clamp(0.0, 10.0) as i64;
                    match records.update_score(&item_id, score).await {
                        Ok(()) => ItemReport::success(item_id, Some(format!("scored {score}"))),
                        Err(e) => {
                            ItemReport::errored(item_id, format!("score write-back failed: {e}"))
                        }
                    }
                }
                Err(e) => ItemReport::errored(item_id, e.to_string()),
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}

/// Flatten a record into the prompt body. `None` for a record with
/// nothing worth scoring.
fn render_record(record: &TraceRecord) -> Option<String> {
    let answer = record.answer_text()?;
    let query = record.query_text().unwrap_or("(none)");
    let reasoning = record.reasoning.as_deref().unwrap_or("(none)");
    Some(format!(
        "Query:\n{query}\n\nReasoning:\n{reasoning}\n\nAnswer:\n{answer}"
    ))
}
