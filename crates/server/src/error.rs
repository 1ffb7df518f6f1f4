// crates/server/src/error.rs
//! API error responses and the client-facing stream error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use tracedeck_core::error::ProviderError;
use tracedeck_core::store::StoreError;

/// Structured JSON error body for REST errors.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), details: None }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self { error: error.into(), details: Some(details.into()) }
    }
}

/// REST-surface errors, mapped to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                )
            }
            ApiError::RecordNotFound(id) => {
                tracing::warn!(record_id = %id, "record not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Record not found", format!("Record ID: {id}")),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "bad request");
                (StatusCode::BAD_REQUEST, ErrorResponse::with_details("Bad request", msg.clone()))
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "conflict");
                (StatusCode::CONFLICT, ErrorResponse::with_details("Conflict", msg.clone()))
            }
            ApiError::Store(e) => {
                tracing::error!(error = %e, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Storage error", e.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "internal server error");
                // Internal details stay out of the response body.
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("Internal server error"))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Machine-readable error codes surfaced on SSE `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamErrorCode {
    InvalidCredential,
    ProviderError,
    RateLimited,
    Timeout,
    ParseError,
    NetworkError,
    Cancelled,
    InvalidRequest,
}

/// Terminal error payload for one stream: `{code, message, retryable,
/// details}`. Built in exactly one place per source — the `From`
/// impl below is the single provider-to-client mapping point.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamError {
    pub code: StreamErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StreamError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: StreamErrorCode::InvalidRequest,
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self {
            code: StreamErrorCode::InvalidCredential,
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            code: StreamErrorCode::Cancelled,
            message: "cancelled".into(),
            retryable: false,
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: StreamErrorCode::ProviderError,
            message: message.into(),
            retryable: true,
            details: None,
        }
    }
}

impl From<&ProviderError> for StreamError {
    fn from(e: &ProviderError) -> Self {
        // 401/403 → invalid-credential, 429 → rate-limited, other 4xx →
        // invalid-request; everything else defaults to a retryable
        // provider-side failure.
        let (code, retryable) = match e {
            ProviderError::InvalidCredential { .. } => (StreamErrorCode::InvalidCredential, false),
            ProviderError::RateLimited => (StreamErrorCode::RateLimited, true),
            ProviderError::InvalidRequest { .. } => (StreamErrorCode::InvalidRequest, false),
            ProviderError::Upstream { .. } => (StreamErrorCode::ProviderError, true),
            ProviderError::Network(_) => (StreamErrorCode::NetworkError, true),
            ProviderError::Timeout => (StreamErrorCode::Timeout, true),
            ProviderError::Parse(_) => (StreamErrorCode::ParseError, false),
            ProviderError::Cancelled => (StreamErrorCode::Cancelled, false),
        };
        Self { code, message: e.to_string(), retryable, details: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn extract(response: Response) -> (StatusCode, ErrorResponse) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_job_not_found_is_404() {
        let (status, body) = extract(ApiError::JobNotFound("score_1_ab".into()).into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Job not found");
        assert!(body.details.unwrap().contains("score_1_ab"));
    }

    #[tokio::test]
    async fn test_bad_request_is_400() {
        let (status, body) = extract(ApiError::BadRequest("nope".into()).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.details.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_internal_hides_details() {
        let (status, body) = extract(ApiError::Internal("secret".into()).into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.details.is_none());
    }

    #[tokio::test]
    async fn test_store_error_maps_to_500() {
        let err = ApiError::from(StoreError::Backend("db down".into()));
        let (status, _) = extract(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_stream_error_mapping_table() {
        let cases: Vec<(ProviderError, StreamErrorCode, bool)> = vec![
            (ProviderError::InvalidCredential { status: 401 }, StreamErrorCode::InvalidCredential, false),
            (ProviderError::RateLimited, StreamErrorCode::RateLimited, true),
            (
                ProviderError::InvalidRequest { status: 422, body: String::new() },
                StreamErrorCode::InvalidRequest,
                false,
            ),
            (
                ProviderError::Upstream { status: 502, body: String::new() },
                StreamErrorCode::ProviderError,
                true,
            ),
            (ProviderError::Network("reset".into()), StreamErrorCode::NetworkError, true),
            (ProviderError::Timeout, StreamErrorCode::Timeout, true),
            (ProviderError::Parse("bad".into()), StreamErrorCode::ParseError, false),
            (ProviderError::Cancelled, StreamErrorCode::Cancelled, false),
        ];
        for (source, code, retryable) in cases {
            let mapped = StreamError::from(&source);
            assert_eq!(mapped.code, code, "wrong code for {source:?}");
            assert_eq!(mapped.retryable, retryable, "wrong retryable for {source:?}");
        }
    }

    #[test]
    fn test_stream_error_wire_shape() {
        let err = StreamError::from(&ProviderError::RateLimited);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "rate-limited");
        assert_eq!(json["retryable"], true);
        assert!(json["message"].is_string());
    }
}
