// crates/core/src/parsing/progressive.rs
//! Stateful streaming parser: accumulates text as chunks arrive and
//! re-derives the reasoning/answer split on every update by re-scanning
//! for tag boundaries. Re-scanning keeps the state machine trivial — the
//! buffer is the only state that matters, the phase is derived from it.

use super::think::{split_think_tags, ThinkSplit};

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Where the stream currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    /// Nothing meaningful has arrived yet.
    Waiting,
    /// An open `<think>` with no close — tokens are reasoning.
    Reasoning,
    /// Past the close tag (or no tag at all) — tokens are answer.
    Answer,
    /// `finalize` was called.
    Complete,
}

impl ParsePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Reasoning => "reasoning",
            Self::Answer => "answer",
            Self::Complete => "complete",
        }
    }
}

/// Snapshot of the parse at some point mid-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedView {
    pub reasoning: String,
    pub answer: String,
    pub phase: ParsePhase,
}

/// Accumulating parser for one stream session. Not reusable across
/// connections — create one per stream, call [`push`](Self::push) per
/// chunk, [`finalize`](Self::finalize) once at the end.
#[derive(Debug, Default)]
pub struct ProgressiveParser {
    buffer: String,
    finalized: bool,
}

impl ProgressiveParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the re-derived view.
    pub fn push(&mut self, chunk: &str) -> ParsedView {
        self.buffer.push_str(chunk);
        self.view()
    }

    /// Re-derive `{reasoning, answer, phase}` from the accumulated buffer.
    pub fn view(&self) -> ParsedView {
        if self.finalized {
            let split = split_think_tags(&self.buffer);
            return ParsedView {
                reasoning: split.reasoning,
                answer: split.answer,
                phase: ParsePhase::Complete,
            };
        }

        let trimmed = self.buffer.trim();
        if trimmed.is_empty() || OPEN_TAG.starts_with(trimmed) {
            // Nothing yet, or a partial opening tag still arriving.
            return ParsedView {
                reasoning: String::new(),
                answer: String::new(),
                phase: ParsePhase::Waiting,
            };
        }

        let split = split_think_tags(&self.buffer);
        let phase = if split.has_think_tags && !self.buffer.contains(CLOSE_TAG) {
            ParsePhase::Reasoning
        } else {
            ParsePhase::Answer
        };
        ParsedView {
            reasoning: split.reasoning,
            answer: split.answer,
            phase,
        }
    }

    /// Force-close an unterminated reasoning span and return the final
    /// split. The returned reasoning never contains an orphaned tag marker.
    pub fn finalize(&mut self) -> ThinkSplit {
        if self.buffer.contains(OPEN_TAG) && !self.buffer.contains(CLOSE_TAG) {
            self.buffer.push_str(CLOSE_TAG);
        }
        self.finalized = true;
        split_think_tags(&self.buffer)
    }

    /// Accumulated raw text (including any tags).
    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}
