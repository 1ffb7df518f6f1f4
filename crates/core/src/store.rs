// crates/core/src/store.rs
//! The record-repository seam.
//!
//! The storage layer is a collaborator, not part of the core: jobs and
//! routes only ever talk to a `dyn RecordStore`. The SQLite backend lives
//! in `tracedeck-db`; tests can substitute anything that implements the
//! trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Session, TraceRecord, Turn};

/// Which records a batch job operates on. The three selectors are mutually
/// exclusive by construction — request validation happens at the HTTP
/// boundary, the core only ever sees a well-formed scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordScope {
    /// Every record in one session.
    Session(String),
    /// An explicit id list.
    Ids(Vec<String>),
    /// Records scored at or below a threshold (unscored records excluded).
    MaxScore(i64),
}

/// Write-back patch for a record's content fields. `None` leaves the field
/// untouched; jobs never replace a whole record.
#[derive(Debug, Clone, Default)]
pub struct RecordContentPatch {
    pub query: Option<String>,
    pub reasoning: Option<String>,
    pub answer: Option<String>,
    pub messages: Option<Vec<Turn>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Swappable record repository.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// concurrently — batch slices issue up to `concurrency` repository writes
/// at once.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one page of records for a scope, ordered by id for stable
    /// pagination.
    async fn list_records(
        &self,
        scope: &RecordScope,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<TraceRecord>, StoreError>;

    async fn get_record(&self, id: &str) -> Result<Option<TraceRecord>, StoreError>;

    async fn update_score(&self, id: &str, score: i64) -> Result<(), StoreError>;

    async fn update_content(&self, id: &str, patch: &RecordContentPatch)
        -> Result<(), StoreError>;

    /// Returns `false` if the record did not exist.
    async fn delete_record(&self, id: &str) -> Result<bool, StoreError>;

    /// Insert a record, or skip it if the id already exists. Returns `true`
    /// when a row was actually inserted.
    async fn insert_record(&self, record: &TraceRecord) -> Result<bool, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Records whose session row is missing.
    async fn list_orphans(&self, limit: u32) -> Result<Vec<TraceRecord>, StoreError>;

    /// Create a session row if absent (used by orphan repair). Idempotent.
    async fn create_session(&self, id: &str, name: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_serde_round_trip() {
        let scope = RecordScope::Session("sess-9".into());
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"session":"sess-9"}"#);

        let back: RecordScope = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, RecordScope::Session(s) if s == "sess-9"));

        let scope = RecordScope::MaxScore(3);
        assert_eq!(serde_json::to_string(&scope).unwrap(), r#"{"maxScore":3}"#);
    }

    #[test]
    fn test_content_patch_default_is_noop() {
        let patch = RecordContentPatch::default();
        assert!(patch.query.is_none());
        assert!(patch.reasoning.is_none());
        assert!(patch.answer.is_none());
        assert!(patch.messages.is_none());
    }
}
