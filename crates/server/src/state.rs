// crates/server/src/state.rs
//! Application state for the axum server.

use std::sync::Arc;
use std::time::Instant;

use tracedeck_core::provider::ProviderClient;
use tracedeck_core::store::RecordStore;

use crate::crypto::ServerIdentity;
use crate::jobs::runners::RunnerDeps;
use crate::jobs::JobStore;

/// Shared application state, constructor-injected — no module-level
/// singletons anywhere, so tests spin up fully isolated instances.
pub struct AppState {
    /// Server start time for uptime reporting.
    pub start_time: Instant,
    /// Record repository (swappable backend behind the trait).
    pub records: Arc<dyn RecordStore>,
    /// Background job store (in-memory truth + durable mirror).
    pub jobs: Arc<JobStore>,
    /// Shared provider HTTP client.
    pub client: ProviderClient,
    /// Transit-decryption identity for provider credentials.
    pub identity: ServerIdentity,
}

impl AppState {
    pub fn new(
        records: Arc<dyn RecordStore>,
        jobs: Arc<JobStore>,
        identity: ServerIdentity,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            records,
            jobs,
            client: ProviderClient::new(),
            identity,
        })
    }

    /// Bundle for handing to job runners.
    pub fn runner_deps(&self) -> RunnerDeps {
        RunnerDeps {
            records: self.records.clone(),
            jobs: self.jobs.clone(),
            client: self.client.clone(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tracedeck_db::{Database, SqliteRecordStore};

    /// In-memory state for route tests: fresh database, archive-backed
    /// job store, throwaway identity.
    pub(crate) async fn test_state() -> Arc<AppState> {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        let records = Arc::new(SqliteRecordStore::new(db.clone()));
        let jobs = Arc::new(JobStore::new(Some(db)));
        AppState::new(records, jobs, ServerIdentity::generate())
    }
}
