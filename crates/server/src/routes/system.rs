// crates/server/src/routes/system.rs
//! System endpoints.
//!
//! - GET /health         — liveness, version, uptime
//! - GET /system/pubkey  — transit-encryption public key

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PubkeyResponse {
    public_key: String,
    algorithm: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
    })
}

async fn pubkey(State(state): State<Arc<AppState>>) -> Json<PubkeyResponse> {
    Json(PubkeyResponse {
        public_key: state.identity.public_key_b64(),
        algorithm: "x25519-xsalsa20-poly1305",
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/system/pubkey", get(pubkey))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = crate::routes::api_routes(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn test_pubkey_round_trips_with_seal() {
        let state = test_state().await;
        let app = crate::routes::api_routes(state.clone());
        let response = app
            .oneshot(Request::builder().uri("/api/system/pubkey").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let pubkey = json["publicKey"].as_str().unwrap();

        let sealed = crate::crypto::seal_for_server(pubkey, "sk-roundtrip").unwrap();
        assert_eq!(state.identity.decrypt_credential(&sealed).unwrap(), "sk-roundtrip");
    }
}
