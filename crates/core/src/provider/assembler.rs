// crates/core/src/provider/assembler.rs
//! Accumulates normalized chunks into one text buffer, synthesizing a
//! virtual `<think>...</think>` wrapper around a provider-native reasoning
//! channel. Downstream parsing then sees one tag convention regardless of
//! whether the provider separates the channels or inlines tags itself.

use serde::Serialize;

use super::types::{NormalizedChunk, ToolCallRequest, Usage};

/// Everything a finished stream produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutcome {
    /// Accumulated text, with the synthesized think wrapper if the
    /// provider streamed a separate reasoning channel.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Chunk-to-text assembler for one stream.
///
/// The tag is opened on the first reasoning token, closed on the first
/// subsequent content token, or at stream end if reasoning was still open.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    reasoning_open: bool,
    usage: Usage,
    tool_calls: Vec<ToolCallRequest>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in. Returns the synthesized text delta this chunk
    /// contributed (may be empty for usage-only or tool-only frames).
    pub fn push(&mut self, chunk: &NormalizedChunk) -> String {
        let mut delta = String::new();

        if let Some(reasoning) = chunk.reasoning_content.as_deref() {
            if !reasoning.is_empty() {
                if !self.reasoning_open {
                    delta.push_str("<think>");
                    self.reasoning_open = true;
                }
                delta.push_str(reasoning);
            }
        }

        if let Some(content) = chunk.content.as_deref() {
            if !content.is_empty() {
                if self.reasoning_open {
                    delta.push_str("</think>");
                    self.reasoning_open = false;
                }
                delta.push_str(content);
            }
        }

        if chunk.done && self.reasoning_open {
            delta.push_str("</think>");
            self.reasoning_open = false;
        }

        if let Some(usage) = &chunk.usage {
            self.usage.merge(usage);
        }

        for call in &chunk.tool_calls {
            if call.name.is_empty() && call.id.is_none() {
                // Argument fragment for the most recently opened call.
                if let Some(last) = self.tool_calls.last_mut() {
                    last.arguments.push_str(&call.arguments);
                }
            } else {
                self.tool_calls.push(call.clone());
            }
        }

        self.text.push_str(&delta);
        delta
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> StreamOutcome {
        StreamOutcome {
            text: self.text,
            usage: (!self.usage.is_empty()).then_some(self.usage),
            tool_calls: self.tool_calls,
        }
    }
}
