// crates/server/src/routes/jobs.rs
//! Background job endpoints.
//!
//! - POST /jobs/{type}        — validate, create, 202, run in background
//! - GET  /jobs               — merged job list (?type&status&limit)
//! - GET  /jobs/{id}          — full job record
//! - POST /jobs/{id}/cancel   — cooperative cancellation
//! - POST /jobs/{id}/resume   — continue a failed job from its trace

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::jobs::runners::{self, JobParams};
use crate::jobs::store::JobFilter;
use crate::jobs::types::{Job, JobStatus, JobType};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// Body for POST /jobs/{type}. The credential rides outside the params so
/// it never lands on the stored job record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    #[serde(flatten)]
    params: JobParams,
    encrypted_api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResumeJobRequest {
    encrypted_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobListQuery {
    #[serde(rename = "type")]
    job_type: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    job: Job,
}

/// POST /jobs/{type} — 202 accept-and-background-run. The response goes
/// out immediately; the runner continues after it is sent.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Path(type_str): Path<String>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job_type = JobType::parse(&type_str)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown job type: {type_str}")))?;

    validate_params(job_type, &body.params)?;
    let api_key = decrypt_key(&state, body.encrypted_api_key.as_deref())?;

    let params_value = serde_json::to_value(&body.params)
        .map_err(|e| ApiError::Internal(format!("params serialization: {e}")))?;
    let job = state.jobs.create_job(job_type, Some(params_value));
    tracing::info!(job_id = %job.id, job_type = job_type.as_str(), "job accepted");

    let deps = state.runner_deps();
    let spawned = job.clone();
    tokio::spawn(async move {
        runners::execute(deps, spawned, api_key).await;
    });

    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id: job.id })))
}

/// GET /jobs — merged in-memory + durable view, memory wins.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let job_type = match &query.job_type {
        Some(s) => Some(
            JobType::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown job type: {s}")))?,
        ),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some("pending") => Some(JobStatus::Pending),
        Some("running") => Some(JobStatus::Running),
        Some("completed") => Some(JobStatus::Completed),
        Some("failed") => Some(JobStatus::Failed),
        Some(other) => return Err(ApiError::BadRequest(format!("unknown status: {other}"))),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

    let jobs = state.jobs.list_jobs(JobFilter { job_type, status, limit }).await;
    Ok(Json(JobListResponse { jobs }))
}

/// GET /jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.jobs.get_job(&id).await.ok_or(ApiError::JobNotFound(id))?;
    Ok(Json(job))
}

/// POST /jobs/{id}/cancel — flips status to failed with the sentinel; the
/// running pipeline stops before its next slice.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.jobs.get_job(&id).await.ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    if job.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "job is already {}",
            job.status.as_str()
        )));
    }

    let job = state.jobs.cancel_job(&id).await.ok_or(ApiError::JobNotFound(id))?;
    Ok(Json(JobResponse { job }))
}

/// POST /jobs/{id}/resume — rebuild the processed set from the stored
/// trace and continue the same job record. Params come from the job;
/// only the credential (never stored) must be re-supplied.
async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResumeJobRequest>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let job = state.jobs.get_job(&id).await.ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    if job.status != JobStatus::Failed {
        return Err(ApiError::Conflict(format!(
            "only failed jobs can be resumed (status: {})",
            job.status.as_str()
        )));
    }

    let api_key = decrypt_key(&state, body.encrypted_api_key.as_deref())?;

    // Clear the failure before the pipeline starts, otherwise its
    // pre-slice status check reads the old `failed` as a cancellation.
    let job = state
        .jobs
        .update_job(
            &id,
            crate::jobs::types::JobPatch::new().status(JobStatus::Pending).clear_error(),
        )
        .await
        .ok_or(ApiError::JobNotFound(id))?;
    tracing::info!(job_id = %job.id, "job resumed");

    let deps = state.runner_deps();
    let spawned = job.clone();
    tokio::spawn(async move {
        runners::execute(deps, spawned, api_key).await;
    });

    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id: job.id })))
}

fn decrypt_key(state: &AppState, sealed: Option<&str>) -> ApiResult<Option<String>> {
    match sealed {
        Some(sealed) => state
            .identity
            .decrypt_credential(sealed)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("invalid encrypted credential: {e}"))),
        None => Ok(None),
    }
}

/// Reject obviously unrunnable jobs at the boundary instead of letting
/// them fail in the background.
fn validate_params(job_type: JobType, params: &JobParams) -> ApiResult<()> {
    match job_type {
        JobType::Score | JobType::Rewrite => {
            params.scope().map_err(ApiError::BadRequest)?;
            params.provider_config(None).map_err(ApiError::BadRequest)?;
        }
        JobType::RemoveItems | JobType::MigrateReasoning => {
            params.scope().map_err(ApiError::BadRequest)?;
        }
        JobType::OrphanCheck | JobType::OrphanSync => {}
        JobType::MigrateFromExternalStore => {
            if params.source_path.is_none() {
                return Err(ApiError::BadRequest("sourcePath is required".into()));
            }
        }
    }
    Ok(())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/{type}", post(create_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/resume", post(resume_job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use tracedeck_core::record::TraceRecord;
    use tracedeck_core::store::RecordStore;

    async fn post_json(
        app: axum::Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    /// Poll GET /jobs/{id} until the job reaches a terminal status.
    async fn await_terminal(app: &axum::Router, job_id: &str) -> serde_json::Value {
        for _ in 0..100 {
            let (_, job) = get_json(app.clone(), &format!("/api/jobs/{job_id}")).await;
            if job["status"] == "completed" || job["status"] == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_400() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, _) = post_json(app, "/api/jobs/frobnicate", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_scope_is_400() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, json) = post_json(app, "/api/jobs/remove-items", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].as_str().unwrap().contains("sessionId"));
    }

    #[tokio::test]
    async fn test_conflicting_scope_is_400() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, _) = post_json(
            app,
            "/api/jobs/remove-items",
            serde_json::json!({"sessionId": "s", "maxScore": 2}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_score_requires_provider_wiring() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, json) =
            post_json(app, "/api/jobs/score", serde_json::json!({"sessionId": "s"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].as_str().unwrap().contains("baseUrl"));
    }

    #[tokio::test]
    async fn test_remove_items_end_to_end() {
        let state = test_state().await;
        state.records.create_session("sess-1", "batch").await.unwrap();
        for i in 0..3 {
            state
                .records
                .insert_record(&TraceRecord {
                    id: format!("rec-{i}"),
                    session_id: "sess-1".into(),
                    answer: Some("a".into()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let app = crate::routes::api_routes(state.clone());

        let (status, json) = post_json(
            app.clone(),
            "/api/jobs/remove-items",
            serde_json::json!({"sessionId": "sess-1", "concurrency": 2, "batchDelayMs": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = json["jobId"].as_str().unwrap().to_string();
        assert!(job_id.starts_with("remove-items_"));

        let job = await_terminal(&app, &job_id).await;
        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"]["kind"], "remove-items");
        assert_eq!(job["progress"]["current"], 3);
        assert_eq!(job["progress"]["removed"], 3);
        // The trace carries one outcome per item.
        let outcomes = job["result"]["trace"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["type"] == "outcome")
            .count();
        assert_eq!(outcomes, 3);

        // And the records are actually gone.
        assert!(state.records.get_record("rec-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_check_and_sync_end_to_end() {
        let state = test_state().await;
        // Two records pointing at a session that does not exist.
        for i in 0..2 {
            state
                .records
                .insert_record(&TraceRecord {
                    id: format!("lost-{i}"),
                    session_id: "vanished".into(),
                    answer: Some("a".into()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let app = crate::routes::api_routes(state.clone());

        let (status, json) =
            post_json(app.clone(), "/api/jobs/orphan-check", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job = await_terminal(&app, json["jobId"].as_str().unwrap()).await;
        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"]["orphaned"], 2);

        let (_, json) = post_json(app.clone(), "/api/jobs/orphan-sync", serde_json::json!({})).await;
        let job = await_terminal(&app, json["jobId"].as_str().unwrap()).await;
        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"]["repaired"], 2);

        // Repair restored the session row.
        assert!(state.records.list_orphans(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_list_filtering() {
        let state = test_state().await;
        let app = crate::routes::api_routes(state.clone());

        let (_, a) = post_json(app.clone(), "/api/jobs/orphan-check", serde_json::json!({})).await;
        await_terminal(&app, a["jobId"].as_str().unwrap()).await;

        let (status, json) = get_json(app.clone(), "/api/jobs?type=orphan-check").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobs"].as_array().unwrap().len(), 1);

        let (status, json) = get_json(app.clone(), "/api/jobs?status=running").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["jobs"].as_array().unwrap().is_empty());

        let (status, _) = get_json(app, "/api/jobs?status=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_and_cancel_missing_job() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, _) = get_json(app.clone(), "/api/jobs/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post_json(app, "/api/jobs/nope/cancel", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_conflict() {
        let state = test_state().await;
        let app = crate::routes::api_routes(state.clone());
        let (_, json) = post_json(app.clone(), "/api/jobs/orphan-check", serde_json::json!({})).await;
        let job_id = json["jobId"].as_str().unwrap().to_string();
        await_terminal(&app, &job_id).await;

        let (status, _) =
            post_json(app, &format!("/api/jobs/{job_id}/cancel"), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_resume_rejects_non_failed_jobs() {
        let state = test_state().await;
        let app = crate::routes::api_routes(state.clone());
        let (_, json) = post_json(app.clone(), "/api/jobs/orphan-check", serde_json::json!({})).await;
        let job_id = json["jobId"].as_str().unwrap().to_string();
        await_terminal(&app, &job_id).await;

        let (status, _) =
            post_json(app, &format!("/api/jobs/{job_id}/resume"), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_resume_failed_job_reruns_it() {
        let state = test_state().await;
        let app = crate::routes::api_routes(state.clone());

        // Import from a bad path fails the whole job (control-flow error).
        let (status, json) = post_json(
            app.clone(),
            "/api/jobs/migrate-from-external-store",
            serde_json::json!({"sourcePath": "/does/not/exist.jsonl"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = json["jobId"].as_str().unwrap().to_string();
        let job = await_terminal(&app, &job_id).await;
        assert_eq!(job["status"], "failed");

        // Resume is accepted and reruns with the stored params (which
        // still point at the bad path, so it fails again — but through a
        // fresh run, not a stale record).
        let (status, json) =
            post_json(app.clone(), &format!("/api/jobs/{job_id}/resume"), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["jobId"], job_id.as_str());

        let job = await_terminal(&app, &job_id).await;
        assert_eq!(job["status"], "failed");
        // Both runs left their mark on the same trace.
        let errors = job["result"]["trace"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["type"] == "error")
            .count();
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn test_migrate_reasoning_end_to_end() {
        let state = test_state().await;
        state.records.create_session("sess-1", "batch").await.unwrap();
        state
            .records
            .insert_record(&TraceRecord {
                id: "tagged".into(),
                session_id: "sess-1".into(),
                answer: Some("<think>hidden steps</think>42".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        state
            .records
            .insert_record(&TraceRecord {
                id: "plain".into(),
                session_id: "sess-1".into(),
                answer: Some("nothing embedded".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let app = crate::routes::api_routes(state.clone());

        let (_, json) = post_json(
            app.clone(),
            "/api/jobs/migrate-reasoning",
            serde_json::json!({"sessionId": "sess-1"}),
        )
        .await;
        let job = await_terminal(&app, json["jobId"].as_str().unwrap()).await;

        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"]["migrated"], 1);
        assert_eq!(job["progress"]["skipped"], 1);

        let migrated = state.records.get_record("tagged").await.unwrap().unwrap();
        assert_eq!(migrated.reasoning.as_deref(), Some("hidden steps"));
        assert_eq!(migrated.answer.as_deref(), Some("42"));
    }
}
