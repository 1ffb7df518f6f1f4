// crates/core/src/parsing/tool_call.rs
//! `<tool_call>{json}</tool_call>` span extraction. Malformed spans are
//! skipped — one corrupt call must not abort the rest of the parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// One tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Scan `text` for tool-call spans and parse each one independently.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(OPEN_TAG) {
        let after_open = &rest[open + OPEN_TAG.len()..];
        let Some(close) = after_open.find(CLOSE_TAG) else {
            break;
        };
        let body = after_open[..close].trim();
        match serde_json::from_str::<ParsedToolCall>(body) {
            Ok(call) if !call.name.is_empty() => calls.push(call),
            Ok(_) => debug!("skipping tool call with empty name"),
            Err(e) => debug!(error = %e, "skipping malformed tool call span"),
        }
        rest = &after_open[close + CLOSE_TAG.len()..];
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_call() {
        let text = r#"<tool_call>{"name": "search", "arguments": {"q": "rust"}}</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn test_multiple_calls_with_surrounding_text() {
        let text = concat!(
            "Let me check.\n",
            r#"<tool_call>{"name": "a", "arguments": {}}</tool_call>"#,
            " and also ",
            r#"<tool_call>{"name": "b", "arguments": {"x": 1}}</tool_call>"#,
            " done."
        );
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn test_malformed_span_is_skipped() {
        let text = concat!(
            r#"<tool_call>{not json}</tool_call>"#,
            r#"<tool_call>{"name": "ok", "arguments": {}}</tool_call>"#,
        );
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn test_missing_arguments_defaults_to_null() {
        let calls = parse_tool_calls(r#"<tool_call>{"name": "bare"}</tool_call>"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, Value::Null);
    }

    #[test]
    fn test_unclosed_span_ignored() {
        let calls = parse_tool_calls(r#"<tool_call>{"name": "x""#);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_no_spans() {
        assert!(parse_tool_calls("nothing here").is_empty());
    }
}
