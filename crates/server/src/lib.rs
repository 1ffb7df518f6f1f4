// crates/server/src/lib.rs
//! Tracedeck server library.
//!
//! Axum HTTP server for the reasoning-trace operator console: background
//! batch jobs over the record repository, an interactive SSE chat proxy,
//! and the supporting stall monitor and credential transit decryption.

pub mod crypto;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod sse;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse, StreamError, StreamErrorCode};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application: API routes, permissive CORS for the
/// desktop/dev clients, request tracing.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    api_routes(state).layer(cors).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_app(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let app = create_app(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }
}
