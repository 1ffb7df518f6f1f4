// crates/core/src/parsing/mod.rs
//! Pure functions over model output text. No I/O anywhere in this module —
//! the streaming layer feeds text in, jobs and routes read structure out.

pub mod json_extract;
pub mod progressive;
pub mod think;
pub mod tool_call;

pub use json_extract::{extract_json_fields, JsonExtraction};
pub use progressive::{ParsePhase, ParsedView, ProgressiveParser};
pub use think::{combine_reasoning, sanitize_reasoning, split_think_tags, ThinkSplit};
pub use tool_call::{parse_tool_calls, ParsedToolCall};
