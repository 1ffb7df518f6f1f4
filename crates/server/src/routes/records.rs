// crates/server/src/routes/records.rs
//! Read-only browse surface over the record repository.
//!
//! - GET /sessions                — sessions with record counts
//! - GET /sessions/{id}/records   — one page of a session's records
//! - GET /records/{id}            — a single record

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use tracedeck_core::record::{Session, TraceRecord};
use tracedeck_core::store::RecordScope;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 100;
const MAX_PAGE: u32 = 500;

#[derive(Debug, Serialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
struct RecordsResponse {
    records: Vec<TraceRecord>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: u32,
    limit: Option<u32>,
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionsResponse>> {
    let sessions = state.records.list_sessions().await?;
    Ok(Json(SessionsResponse { sessions }))
}

async fn list_session_records(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<RecordsResponse>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let records = state
        .records
        .list_records(&RecordScope::Session(session_id), page.offset, limit)
        .await?;
    Ok(Json(RecordsResponse { records }))
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<String>,
) -> ApiResult<Json<TraceRecord>> {
    let record = state
        .records
        .get_record(&record_id)
        .await?
        .ok_or(ApiError::RecordNotFound(record_id))?;
    Ok(Json(record))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}/records", get(list_session_records))
        .route("/records/{id}", get(get_record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use tracedeck_core::store::RecordStore;

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_sessions_and_records_flow() {
        let state = test_state().await;
        state.records.create_session("sess-1", "curation batch").await.unwrap();
        state
            .records
            .insert_record(&TraceRecord {
                id: "rec-1".into(),
                session_id: "sess-1".into(),
                query: Some("q".into()),
                answer: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let app = crate::routes::api_routes(state.clone());

        let (status, json) = get_json(app.clone(), "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessions"][0]["id"], "sess-1");
        assert_eq!(json["sessions"][0]["recordCount"], 1);

        let (status, json) = get_json(app.clone(), "/api/sessions/sess-1/records").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["records"][0]["id"], "rec-1");

        let (status, json) = get_json(app.clone(), "/api/records/rec-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessionId"], "sess-1");

        let (status, _) = get_json(app, "/api/records/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_session_page_is_ok() {
        let app = crate::routes::api_routes(test_state().await);
        let (status, json) = get_json(app, "/api/sessions/none/records?offset=0&limit=10").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["records"].as_array().unwrap().is_empty());
    }
}
