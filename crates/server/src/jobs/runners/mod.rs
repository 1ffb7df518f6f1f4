// crates/server/src/jobs/runners/mod.rs
//! One runner per job type, all instantiating the pipeline in
//! [`super::pipeline`]. Runners own item resolution (including the resume
//! subtraction), the per-item closure, and nothing else — progress
//! publication, cancellation and completion live in the pipeline.

mod import;
mod migrate;
mod orphan;
mod remove;
mod rewrite;
mod score;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use tracedeck_core::provider::{CompletionOptions, ProviderClient, ProviderConfig, ProviderFamily};
use tracedeck_core::record::TraceRecord;
use tracedeck_core::store::{RecordScope, RecordStore};

use super::pipeline::Tunables;
use super::store::JobStore;
use super::types::{
    success_item_ids, Job, JobPatch, JobResult, JobStatus, JobType, TraceEvent,
};

/// Upper bound on one run's item page.
pub const PAGE_LIMIT: u32 = 500;

/// Everything a runner needs. Constructed once at startup, cloned per job.
#[derive(Clone)]
pub struct RunnerDeps {
    pub records: Arc<dyn RecordStore>,
    pub jobs: Arc<JobStore>,
    pub client: ProviderClient,
}

/// Request parameters for a batch job, as stored on the job record.
/// Secrets never appear here — the encrypted credential travels in a
/// separate request field and is decrypted before the runner starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobParams {
    // Item scope — mutually exclusive selectors.
    pub session_id: Option<String>,
    pub record_ids: Option<Vec<String>>,
    pub max_score: Option<i64>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,

    // Provider (score/rewrite only).
    pub provider: Option<ProviderFamily>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,

    // Tunables.
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub batch_delay_ms: Option<u64>,

    // Import (migrate-from-external-store only).
    pub source_path: Option<String>,
}

impl JobParams {
    /// Resolve the item scope. Exactly one selector must be present.
    pub fn scope(&self) -> Result<RecordScope, String> {
        let mut scopes: Vec<RecordScope> = Vec::new();
        if let Some(session) = &self.session_id {
            scopes.push(RecordScope::Session(session.clone()));
        }
        if let Some(ids) = &self.record_ids {
            scopes.push(RecordScope::Ids(ids.clone()));
        }
        if let Some(threshold) = self.max_score {
            scopes.push(RecordScope::MaxScore(threshold));
        }
        match scopes.len() {
            0 => Err("one of sessionId, recordIds or maxScore is required".into()),
            1 => Ok(scopes.remove(0)),
            _ => Err("sessionId, recordIds and maxScore are mutually exclusive".into()),
        }
    }

    pub fn tunables(&self) -> Tunables {
        Tunables::resolve(
            self.concurrency,
            self.max_retries,
            self.retry_delay_ms,
            self.batch_delay_ms,
        )
    }

    /// Provider wiring for the model-calling runners.
    pub fn provider_config(
        &self,
        api_key: Option<String>,
    ) -> Result<(ProviderConfig, CompletionOptions), String> {
        let base_url = self.base_url.clone().ok_or("baseUrl is required")?;
        let model = self.model.clone().ok_or("model is required")?;
        let family = self.provider.unwrap_or(ProviderFamily::Chat);
        let config = ProviderConfig { family, base_url, api_key };
        let options = CompletionOptions {
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..Default::default()
        };
        Ok((config, options))
    }
}

/// Entry point: dispatch a job to its runner. Spawned by the routes after
/// the 202 response is sent; also the resume path (the job then carries a
/// prior trace, whose success entries are subtracted from the item set).
pub async fn execute(deps: RunnerDeps, job: Job, api_key: Option<String>) {
    let params: JobParams = match job.params.clone() {
        Some(value) => match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                fail_job(&deps.jobs, &job.id, job.trace().to_vec(), format!("undecodable job params: {e}"))
                    .await;
                return;
            }
        },
        None => JobParams::default(),
    };

    let processed = success_item_ids(job.trace());
    let trace = job.trace().to_vec();

    match job.job_type {
        JobType::Score => score::run(&deps, &job.id, &params, processed, trace, api_key).await,
        JobType::Rewrite => rewrite::run(&deps, &job.id, &params, processed, trace, api_key).await,
        JobType::RemoveItems => remove::run(&deps, &job.id, &params, processed, trace).await,
        JobType::MigrateReasoning => migrate::run(&deps, &job.id, &params, processed, trace).await,
        JobType::OrphanCheck => {
            orphan::run(&deps, &job.id, &params, processed, trace, orphan::Mode::Check).await
        }
        JobType::OrphanSync => {
            orphan::run(&deps, &job.id, &params, processed, trace, orphan::Mode::Sync).await
        }
        JobType::MigrateFromExternalStore => {
            import::run(&deps, &job.id, &params, processed, trace).await
        }
    }
}

/// A whole-job control-flow failure (item fetch failed, params invalid).
/// Item-level errors never come through here — they are trace outcomes.
pub(super) async fn fail_job(
    store: &JobStore,
    job_id: &str,
    mut trace: Vec<TraceEvent>,
    message: String,
) {
    error!(job_id, %message, "job failed");
    trace.push(TraceEvent::error(message.clone(), None));
    store
        .update_job(
            job_id,
            JobPatch::new()
                .status(JobStatus::Failed)
                .error(message)
                .result(JobResult::with_trace(trace)),
        )
        .await;
}

/// Fetch the scoped item page and subtract already-processed ids.
pub(super) async fn resolve_items(
    deps: &RunnerDeps,
    params: &JobParams,
    processed: &HashSet<String>,
) -> Result<Vec<TraceRecord>, String> {
    let scope = params.scope()?;
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(PAGE_LIMIT).min(PAGE_LIMIT);
    let records = deps
        .records
        .list_records(&scope, offset, limit)
        .await
        .map_err(|e| format!("failed to fetch work items: {e}"))?;
    Ok(records.into_iter().filter(|r| !processed.contains(&r.id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_mutual_exclusion() {
        let params = JobParams::default();
        assert!(params.scope().is_err());

        let params = JobParams { session_id: Some("s".into()), ..Default::default() };
        assert!(matches!(params.scope().unwrap(), RecordScope::Session(_)));

        let params = JobParams {
            session_id: Some("s".into()),
            max_score: Some(3),
            ..Default::default()
        };
        let err = params.scope().unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn test_provider_config_requires_base_url_and_model() {
        let params = JobParams::default();
        assert!(params.provider_config(None).is_err());

        let params = JobParams {
            base_url: Some("http://localhost:11434".into()),
            model: Some("qwen3".into()),
            provider: Some(ProviderFamily::LocalRuntime),
            ..Default::default()
        };
        let (config, options) = params.provider_config(None).unwrap();
        assert_eq!(config.family, ProviderFamily::LocalRuntime);
        assert_eq!(options.model, "qwen3");
    }

    #[test]
    fn test_params_serde_camel_case() {
        let json = r#"{"sessionId": "s1", "maxRetries": 4, "retryDelayMs": 100}"#;
        let params: JobParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.session_id.as_deref(), Some("s1"));
        assert_eq!(params.max_retries, Some(4));
        assert_eq!(params.tunables().max_retries, 4);
    }
}
