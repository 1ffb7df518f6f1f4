// crates/core/src/lib.rs
//! Core logic for the tracedeck operator console.
//!
//! Everything in this crate is independent of the HTTP server and the
//! storage backend:
//! - `record` / `store` — the trace-record model and the swappable
//!   repository seam the server and jobs operate through
//! - `parsing` — pure text parsing of model output (think tags, embedded
//!   JSON, tool calls, progressive streaming parse)
//! - `provider` — the provider adapter (three wire families) and the
//!   streaming HTTP client built on it

pub mod error;
pub mod parsing;
pub mod provider;
pub mod record;
pub mod store;

pub use error::ProviderError;
pub use record::{Session, TraceRecord, Turn};
pub use store::{RecordContentPatch, RecordScope, RecordStore, StoreError};
