// crates/server/src/routes/mod.rs
//! HTTP route modules.

pub mod chat;
pub mod jobs;
pub mod records;
pub mod system;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// All API routes, nested under `/api`.
pub fn api_routes(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(system::router())
        .merge(records::router())
        .merge(jobs::router())
        .merge(chat::router());

    Router::new().nest("/api", api).with_state(state)
}
