// crates/server/src/jobs/mod.rs
//! Background job subsystem: long-lived, resumable, cancellable batch
//! operations over record sets.
//!
//! - `types` — job records, the trace ledger, per-type progress counters
//! - `store` — the injectable job store (in-memory truth, best-effort
//!   durable mirror)
//! - `pipeline` — the generic bounded-concurrency batch shape every
//!   runner instantiates
//! - `runners` — one module per job type
//! - `stall` — the periodic sweep that fails jobs whose progress stopped

pub mod pipeline;
pub mod runners;
pub mod stall;
pub mod store;
pub mod types;

pub use pipeline::{retry_fixed, run_batch, ItemReport, Tunables};
pub use stall::spawn_stall_monitor;
pub use store::{JobStore, CANCELLED_BY_USER};
pub use types::{
    new_job_id, success_item_ids, ItemOutcome, Job, JobPatch, JobProgress, JobResult, JobStatus,
    JobType, TraceEvent,
};
