// crates/server/src/jobs/runners/import.rs
//! Import from an external store: a JSONL export file, one record per
//! line. Existing records are skipped, never overwritten; malformed lines
//! become skipped trace entries so the ledger accounts for every line.

use std::collections::HashSet;

use serde::Deserialize;

use tracedeck_core::record::{TraceRecord, Turn};

use crate::jobs::pipeline::{run_batch, ItemReport};
use crate::jobs::types::{JobProgress, JobType, TraceEvent};

use super::{fail_job, JobParams, RunnerDeps};

/// One line of the external export. Looser than [`TraceRecord`]: id and
/// session may be absent and get deterministic fallbacks, so a resumed
/// import maps lines to the same item ids.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportLine {
    id: Option<String>,
    session_id: Option<String>,
    score: Option<i64>,
    query: Option<String>,
    reasoning: Option<String>,
    answer: Option<String>,
    messages: Option<Vec<Turn>>,
}

const FALLBACK_SESSION: &str = "imported";

enum ImportItem {
    Record(TraceRecord),
    Malformed { item_id: String, error: String },
}

impl ImportItem {
    fn id(&self) -> &str {
        match self {
            Self::Record(r) => &r.id,
            Self::Malformed { item_id, .. } => item_id,
        }
    }
}

pub(super) async fn run(
    deps: &RunnerDeps,
    job_id: &str,
    params: &JobParams,
    processed: HashSet<String>,
    mut trace: Vec<TraceEvent>,
) {
    let Some(path) = params.source_path.clone() else {
        return fail_job(&deps.jobs, job_id, trace, "sourcePath is required".into()).await;
    };
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            return fail_job(&deps.jobs, job_id, trace, format!("cannot read {path}: {e}")).await
        }
    };

    let items: Vec<ImportItem> = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| parse_line(n + 1, line))
        .filter(|item| !processed.contains(item.id()))
        .collect();

    let total = processed.len() as u64 + items.len() as u64;
    trace.push(TraceEvent::info(format!(
        "importing {} lines from {path} ({} already done)",
        items.len(),
        processed.len()
    )));
    let progress =
        JobProgress::resumed(JobType::MigrateFromExternalStore, total, processed.len() as u64);
    let tunables = params.tunables();

    let process = |item: ImportItem| {
        let records = deps.records.clone();
        async move {
            let record = match item {
                ImportItem::Record(record) => record,
                ImportItem::Malformed { item_id, error } => {
                    return ItemReport::skipped(item_id, format!("unparseable line: {error}"));
                }
            };
            // The session row has to exist before the record points at it,
            // otherwise the import itself manufactures orphans.
            if let Err(e) = records.create_session(&record.session_id, FALLBACK_SESSION).await {
                return ItemReport::errored(record.id, format!("session create failed: {e}"));
            }
            match records.insert_record(&record).await {
                Ok(true) => ItemReport::success(record.id, Some("imported".into())),
                Ok(false) => ItemReport::skipped(record.id, "already present"),
                Err(e) => ItemReport::errored(record.id, format!("insert failed: {e}")),
            }
        }
    };

    run_batch(&deps.jobs, job_id, items, &tunables, progress, trace, process).await;
}

fn parse_line(line_no: usize, line: &str) -> ImportItem {
    match serde_json::from_str::<ImportLine>(line) {
        Ok(parsed) => {
            let session_id =
                parsed.session_id.unwrap_or_else(|| FALLBACK_SESSION.to_string());
            let id = parsed.id.unwrap_or_else(|| format!("{session_id}-l{line_no}"));
            ImportItem::Record(TraceRecord {
                id,
                session_id,
                score: parsed.score,
                query: parsed.query,
                reasoning: parsed.reasoning,
                answer: parsed.answer,
                messages: parsed.messages,
                created_at: None,
            })
        }
        Err(e) => ImportItem::Malformed {
            item_id: format!("line-{line_no}"),
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_full_record() {
        let item = parse_line(1, r#"{"id":"r1","sessionId":"s1","query":"q","answer":"a"}"#);
        match item {
            ImportItem::Record(r) => {
                assert_eq!(r.id, "r1");
                assert_eq!(r.session_id, "s1");
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn test_parse_line_fallback_ids_are_deterministic() {
        let a = parse_line(7, r#"{"query":"q"}"#);
        let b = parse_line(7, r#"{"query":"q"}"#);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), "imported-l7");
    }

    #[test]
    fn test_parse_line_malformed() {
        let item = parse_line(3, "{not json");
        match item {
            ImportItem::Malformed { item_id, .. } => assert_eq!(item_id, "line-3"),
            _ => panic!("expected malformed"),
        }
    }
}
