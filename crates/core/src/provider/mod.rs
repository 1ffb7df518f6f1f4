// crates/core/src/provider/mod.rs
//! Provider adapter and streaming client.
//!
//! Three wire families are supported; every shape difference between them
//! lives in exactly four translation points in [`adapter`]:
//! `build_endpoint`, `build_headers`, `build_payload`, `parse_stream_chunk`.
//! Call sites never branch on the family.

pub mod adapter;
pub mod assembler;
pub mod client;
pub mod types;

pub use assembler::{StreamAssembler, StreamOutcome};
pub use client::{ProviderClient, ProviderConfig};
pub use types::{
    ChatMessage, Completion, CompletionOptions, NormalizedChunk, ProviderFamily, ToolCallRequest,
    ToolDefinition, Usage,
};
