// crates/core/src/record.rs
//! The trace-record model: query/reasoning/answer triples (optionally
//! multi-turn) grouped into sessions.
//!
//! The console never owns a record's lifecycle — jobs read a page of
//! records, compute a transformation, and write selected fields back
//! through [`crate::store::RecordStore`].

use serde::{Deserialize, Serialize};

/// One conversational turn inside a multi-turn record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// One reasoning-trace record.
///
/// Flat records carry `query`/`reasoning`/`answer`; conversational records
/// carry `messages` instead. Both shapes are valid and a record may have a
/// score or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Turn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl TraceRecord {
    /// Multi-turn records carry `messages`; flat ones carry query/reasoning/answer.
    pub fn is_conversational(&self) -> bool {
        self.messages.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// The text a scoring or rewrite prompt should look at: the final
    /// assistant turn for conversational records, the flat answer otherwise.
    pub fn answer_text(&self) -> Option<&str> {
        if let Some(messages) = &self.messages {
            return messages
                .iter()
                .rev()
                .find(|t| t.role == "assistant")
                .map(|t| t.content.as_str());
        }
        self.answer.as_deref()
    }

    /// The user-side text (first user turn, or the flat query).
    pub fn query_text(&self) -> Option<&str> {
        if let Some(messages) = &self.messages {
            return messages
                .iter()
                .find(|t| t.role == "user")
                .map(|t| t.content.as_str());
        }
        self.query.as_deref()
    }
}

/// A session grouping trace records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub record_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
