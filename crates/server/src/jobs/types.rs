// crates/server/src/jobs/types.rs
//! Job records, the append-only trace ledger, and per-type progress
//! counters.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque job identifier: `{type}_{unix_millis}_{random suffix}`.
pub type JobId = String;

/// The fixed set of batch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Score,
    Rewrite,
    RemoveItems,
    MigrateReasoning,
    OrphanCheck,
    OrphanSync,
    MigrateFromExternalStore,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::Rewrite => "rewrite",
            Self::RemoveItems => "remove-items",
            Self::MigrateReasoning => "migrate-reasoning",
            Self::OrphanCheck => "orphan-check",
            Self::OrphanSync => "orphan-sync",
            Self::MigrateFromExternalStore => "migrate-from-external-store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "score" => Some(Self::Score),
            "rewrite" => Some(Self::Rewrite),
            "remove-items" => Some(Self::RemoveItems),
            "migrate-reasoning" => Some(Self::MigrateReasoning),
            "orphan-check" => Some(Self::OrphanCheck),
            "orphan-sync" => Some(Self::OrphanSync),
            "migrate-from-external-store" => Some(Self::MigrateFromExternalStore),
            _ => None,
        }
    }

    /// Whether this job type calls a model provider per item.
    pub fn uses_provider(&self) -> bool {
        matches!(self, Self::Score | Self::Rewrite)
    }
}

/// Job lifecycle. Transitions are pending → running → {completed|failed}
/// only; a failed job may be resumed into a fresh running state, carrying
/// its trace forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How one work item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Success,
    Skipped,
    Errored,
}

/// One entry in a job's trace — the ordered, append-only audit log that
/// doubles as the resume ledger. Only `outcome` entries with
/// [`ItemOutcome::Success`] count as processed on resume; skipped and
/// errored items are retried, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Info {
        timestamp: String,
        message: String,
    },
    Warn {
        timestamp: String,
        message: String,
    },
    Error {
        timestamp: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },
    Outcome {
        timestamp: String,
        item_id: String,
        outcome: ItemOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl TraceEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info { timestamp: now_rfc3339(), message: message.into() }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::Warn { timestamp: now_rfc3339(), message: message.into() }
    }

    pub fn error(message: impl Into<String>, item_id: Option<String>) -> Self {
        Self::Error { timestamp: now_rfc3339(), message: message.into(), item_id }
    }

    pub fn outcome(item_id: impl Into<String>, outcome: ItemOutcome, detail: Option<String>) -> Self {
        Self::Outcome {
            timestamp: now_rfc3339(),
            item_id: item_id.into(),
            outcome,
            detail,
        }
    }

    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Outcome { .. })
    }
}

/// Item ids already successfully processed, reconstructed from a trace.
/// This is the resume set: only success-tagged outcome entries count.
pub fn success_item_ids(trace: &[TraceEvent]) -> HashSet<String> {
    trace
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Outcome { item_id, outcome: ItemOutcome::Success, .. } => {
                Some(item_id.clone())
            }
            _ => None,
        })
        .collect()
}

/// Per-type progress counters over a common `{current, total}` base.
/// Counters are monotonic within a run; on resume they restart from the
/// carried-forward success count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum JobProgress {
    Score { current: u64, total: u64, scored: u64, skipped: u64, errors: u64 },
    Rewrite { current: u64, total: u64, rewritten: u64, skipped: u64, errors: u64 },
    RemoveItems { current: u64, total: u64, removed: u64, skipped: u64, errors: u64 },
    MigrateReasoning { current: u64, total: u64, migrated: u64, skipped: u64, errors: u64 },
    OrphanCheck { current: u64, total: u64, orphaned: u64, skipped: u64, errors: u64 },
    OrphanSync { current: u64, total: u64, repaired: u64, skipped: u64, errors: u64 },
    MigrateFromExternalStore { current: u64, total: u64, imported: u64, skipped: u64, errors: u64 },
}

impl JobProgress {
    /// Zeroed counters for a fresh run.
    pub fn new(job_type: JobType, total: u64) -> Self {
        Self::resumed(job_type, total, 0)
    }

    /// Counters for a resumed run: `already` items carried forward as
    /// successes, skips and errors reset because those items are retried.
    pub fn resumed(job_type: JobType, total: u64, already: u64) -> Self {
        let (current, ok, skipped, errors) = (already, already, 0, 0);
        match job_type {
            JobType::Score => Self::Score { current, total, scored: ok, skipped, errors },
            JobType::Rewrite => Self::Rewrite { current, total, rewritten: ok, skipped, errors },
            JobType::RemoveItems => Self::RemoveItems { current, total, removed: ok, skipped, errors },
            JobType::MigrateReasoning => {
                Self::MigrateReasoning { current, total, migrated: ok, skipped, errors }
            }
            JobType::OrphanCheck => Self::OrphanCheck { current, total, orphaned: ok, skipped, errors },
            JobType::OrphanSync => Self::OrphanSync { current, total, repaired: ok, skipped, errors },
            JobType::MigrateFromExternalStore => {
                Self::MigrateFromExternalStore { current, total, imported: ok, skipped, errors }
            }
        }
    }

    pub fn current(&self) -> u64 {
        match self {
            Self::Score { current, .. }
            | Self::Rewrite { current, .. }
            | Self::RemoveItems { current, .. }
            | Self::MigrateReasoning { current, .. }
            | Self::OrphanCheck { current, .. }
            | Self::OrphanSync { current, .. }
            | Self::MigrateFromExternalStore { current, .. } => *current,
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            Self::Score { total, .. }
            | Self::Rewrite { total, .. }
            | Self::RemoveItems { total, .. }
            | Self::MigrateReasoning { total, .. }
            | Self::OrphanCheck { total, .. }
            | Self::OrphanSync { total, .. }
            | Self::MigrateFromExternalStore { total, .. } => *total,
        }
    }

    /// Count of success-tagged items.
    pub fn succeeded(&self) -> u64 {
        match self {
            Self::Score { scored, .. } => *scored,
            Self::Rewrite { rewritten, .. } => *rewritten,
            Self::RemoveItems { removed, .. } => *removed,
            Self::MigrateReasoning { migrated, .. } => *migrated,
            Self::OrphanCheck { orphaned, .. } => *orphaned,
            Self::OrphanSync { repaired, .. } => *repaired,
            Self::MigrateFromExternalStore { imported, .. } => *imported,
        }
    }

    pub fn error_count(&self) -> u64 {
        match self {
            Self::Score { errors, .. }
            | Self::Rewrite { errors, .. }
            | Self::RemoveItems { errors, .. }
            | Self::MigrateReasoning { errors, .. }
            | Self::OrphanCheck { errors, .. }
            | Self::OrphanSync { errors, .. }
            | Self::MigrateFromExternalStore { errors, .. } => *errors,
        }
    }

    /// Advance `current` and the matching per-outcome counter by one.
    pub fn bump(&mut self, result: ItemOutcome) {
        macro_rules! advance {
            ($current:ident, $ok:ident, $skipped:ident, $errors:ident) => {{
                *$current += 1;
                match result {
                    ItemOutcome::Success => *$ok += 1,
                    ItemOutcome::Skipped => *$skipped += 1,
                    ItemOutcome::Errored => *$errors += 1,
                }
            }};
        }
        match self {
            Self::Score { current, scored, skipped, errors, .. } => {
                advance!(current, scored, skipped, errors)
            }
            Self::Rewrite { current, rewritten, skipped, errors, .. } => {
                advance!(current, rewritten, skipped, errors)
            }
            Self::RemoveItems { current, removed, skipped, errors, .. } => {
                advance!(current, removed, skipped, errors)
            }
            Self::MigrateReasoning { current, migrated, skipped, errors, .. } => {
                advance!(current, migrated, skipped, errors)
            }
            Self::OrphanCheck { current, orphaned, skipped, errors, .. } => {
                advance!(current, orphaned, skipped, errors)
            }
            Self::OrphanSync { current, repaired, skipped, errors, .. } => {
                advance!(current, repaired, skipped, errors)
            }
            Self::MigrateFromExternalStore { current, imported, skipped, errors, .. } => {
                advance!(current, imported, skipped, errors)
            }
        }
    }
}

/// Free-form completion payload plus the trace ledger. The trace is always
/// present; summary fields vary by job type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
    #[serde(flatten)]
    pub summary: serde_json::Map<String, Value>,
}

impl JobResult {
    pub fn with_trace(trace: Vec<TraceEvent>) -> Self {
        Self { trace, summary: serde_json::Map::new() }
    }
}

/// One background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Original request parameters, secrets excluded — enough to rerun or
    /// resume without the client re-supplying them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, params: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: new_job_id(job_type),
            job_type,
            status: JobStatus::Pending,
            progress: None,
            result: None,
            params,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored trace, or empty if the job never produced one.
    pub fn trace(&self) -> &[TraceEvent] {
        self.result.as_ref().map(|r| r.trace.as_slice()).unwrap_or_default()
    }

    pub fn apply(&mut self, patch: JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = Some(progress);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        if let Some(params) = patch.params {
            self.params = Some(params);
        }
        self.updated_at = Utc::now();
    }
}

/// Shallow patch applied by [`super::store::JobStore::update_job`].
/// `error: Some(None)` clears a previous error (used by resume).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<JobProgress>,
    pub result: Option<JobResult>,
    pub error: Option<Option<String>>,
    pub params: Option<Value>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: JobProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Allocate a fresh job id: type prefix, creation millis, random suffix.
pub fn new_job_id(job_type: JobType) -> JobId {
    let millis = Utc::now().timestamp_millis();
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{}_{millis}_{suffix}", job_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_type_round_trip() {
        for t in [
            JobType::Score,
            JobType::Rewrite,
            JobType::RemoveItems,
            JobType::MigrateReasoning,
            JobType::OrphanCheck,
            JobType::OrphanSync,
            JobType::MigrateFromExternalStore,
        ] {
            assert_eq!(JobType::parse(t.as_str()), Some(t));
        }
        assert_eq!(JobType::parse("nonsense"), None);
    }

    #[test]
    fn test_job_id_shape() {
        let id = new_job_id(JobType::RemoveItems);
        assert!(id.starts_with("remove-items_"));
        let parts: Vec<&str> = id.rsplitn(2, '_').collect();
        assert_eq!(parts[0].len(), 8);
    }

    #[test]
    fn test_progress_bump_per_outcome() {
        let mut progress = JobProgress::new(JobType::Score, 5);
        progress.bump(ItemOutcome::Success);
        progress.bump(ItemOutcome::Success);
        progress.bump(ItemOutcome::Skipped);
        progress.bump(ItemOutcome::Errored);
        assert_eq!(progress.current(), 4);
        assert_eq!(progress.succeeded(), 2);
        assert_eq!(progress.error_count(), 1);
        match progress {
            JobProgress::Score { skipped, .. } => assert_eq!(skipped, 1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_progress_resumed_carries_successes_only() {
        let progress = JobProgress::resumed(JobType::Rewrite, 10, 6);
        assert_eq!(progress.current(), 6);
        assert_eq!(progress.succeeded(), 6);
        assert_eq!(progress.error_count(), 0);
    }

    #[test]
    fn test_progress_serde_tagged() {
        let progress = JobProgress::new(JobType::MigrateReasoning, 3);
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["kind"], "migrate-reasoning");
        assert_eq!(json["total"], 3);
        assert_eq!(json["migrated"], 0);
    }

    #[test]
    fn test_trace_event_serde_type_tagged() {
        let event = TraceEvent::outcome("rec-1", ItemOutcome::Success, Some("scored 7".into()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "outcome");
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["itemId"].as_str(), None); // snake_case fields
        assert_eq!(json["item_id"], "rec-1");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_success_item_ids_ignores_non_success() {
        let trace = vec![
            TraceEvent::info("starting"),
            TraceEvent::outcome("a", ItemOutcome::Success, None),
            TraceEvent::outcome("b", ItemOutcome::Skipped, None),
            TraceEvent::outcome("c", ItemOutcome::Errored, Some("boom".into())),
            TraceEvent::outcome("d", ItemOutcome::Success, None),
            TraceEvent::error("whole batch hiccup", None),
        ];
        let ids = success_item_ids(&trace);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a"));
        assert!(ids.contains("d"));
    }

    #[test]
    fn test_job_apply_patch() {
        let mut job = Job::new(JobType::Score, None);
        let before = job.updated_at;
        assert_eq!(job.status, JobStatus::Pending);

        job.apply(JobPatch::new().status(JobStatus::Running).progress(JobProgress::new(JobType::Score, 9)));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress.as_ref().unwrap().total(), 9);
        assert!(job.updated_at >= before);

        job.apply(JobPatch::new().status(JobStatus::Failed).error("cancelled by user"));
        assert_eq!(job.error.as_deref(), Some("cancelled by user"));

        job.apply(JobPatch::new().clear_error());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_job_serde_round_trip() {
        let mut job = Job::new(JobType::OrphanCheck, Some(serde_json::json!({"limit": 10})));
        job.apply(
            JobPatch::new()
                .status(JobStatus::Completed)
                .result(JobResult::with_trace(vec![TraceEvent::info("done")])),
        );
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"type\":\"orphan-check\""));
        assert!(json.contains("\"createdAt\""));

        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, JobStatus::Completed);
        assert_eq!(back.trace().len(), 1);
    }
}
