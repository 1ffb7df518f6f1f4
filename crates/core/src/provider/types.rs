// crates/core/src/provider/types.rs
//! Provider-agnostic request/response types. Everything a provider call
//! produces is normalized into these before anyone else sees it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three wire-shape conventions the adapter translates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    /// OpenAI-compatible chat completions: bearer auth, SSE `data:` frames,
    /// `choices[].delta`.
    Chat,
    /// Anthropic-style messages: system prompt as a top-level field, typed
    /// stream events (`content_block_delta` / `message_delta` /
    /// `message_stop`).
    MessageDelta,
    /// Ollama-style local runtime: no bearer auth, `/api/chat`, raw
    /// newline-delimited JSON frames with a boolean `done` flag.
    LocalRuntime,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::MessageDelta => "message-delta",
            Self::LocalRuntime => "local-runtime",
        }
    }
}

/// One message in the provider-agnostic request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// Provider-agnostic completion options.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub stream: bool,
}

/// Token accounting, as far as the provider reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl Usage {
    /// Field-wise merge, newer values winning. Providers report usage in
    /// pieces (input on start, output on stop) so partial merges are the
    /// normal case.
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none()
    }
}

/// A tool invocation as it appears on the wire. During streaming the
/// arguments arrive in fragments; [`super::StreamAssembler`] glues them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Raw JSON string of the arguments (may be a fragment mid-stream).
    pub arguments: String,
}

/// One normalized streaming frame — the single internal representation all
/// three wire formats collapse into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub done: bool,
}

impl NormalizedChunk {
    pub fn done_marker() -> Self {
        Self { done: true, ..Default::default() }
    }
}

/// A whole non-streaming completion, normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
