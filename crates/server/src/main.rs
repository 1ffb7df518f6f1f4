// crates/server/src/main.rs
//! Tracedeck server binary.
//!
//! Opens the database, loads the transit-decryption identity, spawns the
//! stall monitor and serves the API. Configuration is environment-based:
//! `TRACEDECK_PORT`/`PORT`, `TRACEDECK_DB`, `TRACEDECK_IDENTITY`, and
//! `RUST_LOG` for log filtering.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use tracedeck_db::{Database, SqliteRecordStore};
use tracedeck_server::crypto::ServerIdentity;
use tracedeck_server::jobs::{spawn_stall_monitor, JobStore};
use tracedeck_server::{create_app, AppState};

const DEFAULT_PORT: u16 = 47811;

fn get_port() -> u16 {
    std::env::var("TRACEDECK_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn identity_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("TRACEDECK_IDENTITY") {
        return Some(PathBuf::from(p));
    }
    dirs::data_local_dir().map(|d| d.join("tracedeck").join("identity.key"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    eprintln!("\ntracedeck v{}\n", env!("CARGO_PKG_VERSION"));

    let db = Database::open_default().await?;
    let records = Arc::new(SqliteRecordStore::new(db.clone()));
    let jobs = Arc::new(JobStore::new(Some(db)));

    let identity_path =
        identity_path().ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;
    let identity = ServerIdentity::load_or_create(&identity_path)
        .map_err(|e| anyhow::anyhow!("identity setup failed: {e}"))?;

    let state = AppState::new(records, jobs.clone(), identity);

    // Background sweep for jobs whose owner died or hung.
    spawn_stall_monitor(jobs);

    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], get_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("  listening on http://{addr}\n");

    axum::serve(listener, app).await?;
    Ok(())
}
