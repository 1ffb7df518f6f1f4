// crates/server/src/jobs/runners/rewrite.rs
//! Batch rewrite: ask the model for a cleaned-up reasoning trace, split
//! the response into reasoning/answer, sanitize, and write the fields
//! back. Conversational records get their final assistant turn rewritten
//! in place.

use std::collections::HashSet;

use tracedeck_core::parsing::{combine_reasoning, sanitize_reasoning, split_think_tags};
use tracedeck_core::provider::ChatMessage;
use tracedeck_core::record::TraceRecord;
use tracedeck_core::store::RecordContentPatch;

use crate::jobs::pipeline::{retry_fixed, run_batch, ItemReport};
use crate::jobs::types::{JobProgress, JobType, TraceEvent};

use super::{fail_job, resolve_items, JobParams, RunnerDeps};

const DEFAULT_PROMPT: &str = "Rewrite the reasoning trace below so it is clear, step-by-step and \
free of dead ends, then restate the final answer. Respond with the rewritten reasoning inside \
<think>...</think> tags followed by the final answer.";

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
        "rewriting {} items with {} ({} already done)",
        items.len(),
        options.model,
        processed.len()
    )));
    let progress = JobProgress::resumed(JobType::Rewrite, total, processed.len() as u64);
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
            let Some(answer) = record.answer_text() else {
                return ItemReport::skipped(item_id, "record has no content to rewrite");
            };
            let query = record.query_text().unwrap_or("(none)");
            let reasoning = record.reasoning.as_deref().unwrap_or("");
            let body = format!(
                "{prompt}\n\nQuery:\n{query}\n\nOriginal reasoning:\n{reasoning}\n\nOriginal answer:\n{answer}"
            );
            let messages = vec![ChatMessage::user(body)];

            let completion = retry_fixed(max_retries, retry_delay, || {
                client.complete(&config, &messages, &options)
            })
            .await;

            let completion = match completion {
                Ok(c) => c,
                Err(e) => return ItemReport::errored(item_id, e.to_string()),
            };

            // Normalize a native reasoning channel into the tag convention
            // before splitting, so both response styles parse the same way.
            let text = match completion.reasoning_content.as_deref() {
                Some(native) => combine_reasoning(native, &completion.content),
                None => completion.content,
            };
            let split = split_think_tags(&text);
            let new_reasoning = sanitize_reasoning(&split.reasoning);
            if new_reasoning.is_empty() && split.answer.is_empty() {
                return ItemReport::skipped(item_id, "empty rewrite response");
            }

            let patch = build_patch(&record, &new_reasoning, &split.answer);
            match records.update_content(&item_id, &patch).await {
                Ok(()) => ItemReport::success(item_id, Some("rewritten".into())),
                Err(e) => ItemReport::errored(item_id, format!("rewrite write-back failed: {e}")),
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}

/// Flat records get the reasoning/answer fields replaced; conversational
/// records get their final assistant turn replaced with the recombined
/// text, keeping the reasoning inline where the turn format carries it.
fn build_patch(record: &TraceRecord, reasoning: &str, answer: &str) -> RecordContentPatch {
    if let Some(messages) = &record.messages {
        let mut rewritten = messages.clone();
        if let Some(last) = rewritten.iter_mut().rev().find(|t| t.role == "assistant") {
            last.content = combine_reasoning(reasoning, answer);
        }
        RecordContentPatch { messages: Some(rewritten), ..Default::default() }
    } else {
        RecordContentPatch {
            reasoning: Some(reasoning.to_string()),
            answer: Some(answer.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracedeck_core::record::Turn;

    #[test]
    fn test_build_patch_flat() {
        let record = TraceRecord {
            id: "r".into(),
            session_id: "s".into(),
            answer: Some("old".into()),
            ..Default::default()
        };
        let patch = build_patch(&record, "new reasoning", "new answer");
        assert_eq!(patch.reasoning.as_deref(), Some("new reasoning"));
        assert_eq!(patch.answer.as_deref(), Some("new answer"));
        assert!(patch.messages.is_none());
    }

    #[test]
    fn test_build_patch_conversational_rewrites_last_assistant_turn() {
        let record = TraceRecord {
            id: "r".into(),
            session_id: "s".into(),
            messages: Some(vec![
                Turn { role: "user".into(), content: "q".into() },
                Turn { role: "assistant".into(), content: "old".into() },
                Turn { role: "user".into(), content: "more".into() },
                Turn { role: "assistant".into(), content: "old final".into() },
            ]),
            ..Default::default()
        };
        let patch = build_patch(&record, "r2", "a2");
        let messages = patch.messages.unwrap();
        assert_eq!(messages[1].content, "old");
        assert_eq!(messages[3].content, "<think>\nr2\n</think>\na2");
        assert!(patch.reasoning.is_none());
    }
}
