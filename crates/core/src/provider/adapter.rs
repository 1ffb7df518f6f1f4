// crates/core/src/provider/adapter.rs
//! The four translation points between the normalized shape and each wire
//! family. These functions are total over [`ProviderFamily`] — no call
//! site anywhere else branches on the family.

use serde_json::{json, Map, Value};

use crate::error::ProviderError;
use super::types::{
    ChatMessage, Completion, CompletionOptions, NormalizedChunk, ProviderFamily, ToolCallRequest,
    Usage,
};

/// Anthropic-style requests require max_tokens; used when the caller
/// didn't set one.
const MESSAGE_DELTA_DEFAULT_MAX_TOKENS: u32 = 4096;

const MESSAGE_DELTA_API_VERSION: &str = "2023-06-01";

/// Resolve the request URL for a family against a configured base URL.
pub fn build_endpoint(base_url: &str, family: ProviderFamily) -> String {
    let base = base_url.trim_end_matches('/');
    match family {
        ProviderFamily::Chat => format!("{base}/chat/completions"),
        ProviderFamily::MessageDelta => {
            // Tolerate bases configured with or without the /v1 segment.
            if base.ends_with("/v1") {
                format!("{base}/messages")
            } else {
                format!("{base}/v1/messages")
            }
        }
        ProviderFamily::LocalRuntime => format!("{base}/api/chat"),
    }
}

/// Request headers for a family. The local runtime takes no credential at
/// all — a missing key is only an error for the hosted families, and that
/// surfaces as a 401 from upstream rather than a client-side guess.
pub fn build_headers(api_key: Option<&str>, family: ProviderFamily) -> Vec<(String, String)> {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    match family {
        ProviderFamily::Chat => {
            if let Some(key) = api_key {
                headers.push(("authorization".to_string(), format!("Bearer {key}")));
            }
        }
        ProviderFamily::MessageDelta => {
            if let Some(key) = api_key {
                headers.push(("x-api-key".to_string(), key.to_string()));
            }
            headers.push((
                "anthropic-version".to_string(),
                MESSAGE_DELTA_API_VERSION.to_string(),
            ));
        }
        ProviderFamily::LocalRuntime => {}
    }
    headers
}

/// Build the request body for a family.
///
/// System-prompt placement is the main divergence: a top-level `system`
/// field for message-delta, a leading `system` message for the others.
/// Any `system`-role entries in `messages` are hoisted accordingly.
pub fn build_payload(
    messages: &[ChatMessage],
    options: &CompletionOptions,
    family: ProviderFamily,
) -> Value {
    let mut system_parts: Vec<&str> = Vec::new();
    if let Some(s) = options.system.as_deref() {
        system_parts.push(s);
    }
    let mut chat_messages: Vec<&ChatMessage> = Vec::new();
    for msg in messages {
        if msg.role == "system" {
            system_parts.push(&msg.content);
        } else {
            chat_messages.push(msg);
        }
    }
    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

    let message_values = |include_system: bool| -> Vec<Value> {
        let mut out = Vec::with_capacity(chat_messages.len() + 1);
        if include_system {
            if let Some(s) = &system {
                out.push(json!({"role": "system", "content": s}));
            }
        }
        out.extend(
            chat_messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );
        out
    };

    match family {
        ProviderFamily::Chat => {
            let mut payload = Map::new();
            payload.insert("model".into(), json!(options.model));
            payload.insert("messages".into(), json!(message_values(true)));
            payload.insert("stream".into(), json!(options.stream));
            if let Some(mt) = options.max_tokens {
                payload.insert("max_tokens".into(), json!(mt));
            }
            if let Some(t) = options.temperature {
                payload.insert("temperature".into(), json!(t));
            }
            if let Some(tools) = &options.tools {
                let tools: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                payload.insert("tools".into(), json!(tools));
            }
            Value::Object(payload)
        }
        ProviderFamily::MessageDelta => {
            let mut payload = Map::new();
            payload.insert("model".into(), json!(options.model));
            payload.insert("messages".into(), json!(message_values(false)));
            payload.insert(
                "max_tokens".into(),
                json!(options.max_tokens.unwrap_or(MESSAGE_DELTA_DEFAULT_MAX_TOKENS)),
            );
            payload.insert("stream".into(), json!(options.stream));
            if let Some(s) = &system {
                payload.insert("system".into(), json!(s));
            }
            if let Some(t) = options.temperature {
                payload.insert("temperature".into(), json!(t));
            }
            if let Some(tools) = &options.tools {
                let tools: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect();
                payload.insert("tools".into(), json!(tools));
            }
            Value::Object(payload)
        }
        ProviderFamily::LocalRuntime => {
            let mut payload = Map::new();
            payload.insert("model".into(), json!(options.model));
            payload.insert("messages".into(), json!(message_values(true)));
            payload.insert("stream".into(), json!(options.stream));
            let mut runtime_options = Map::new();
            if let Some(t) = options.temperature {
                runtime_options.insert("temperature".into(), json!(t));
            }
            if let Some(mt) = options.max_tokens {
                runtime_options.insert("num_predict".into(), json!(mt));
            }
            if !runtime_options.is_empty() {
                payload.insert("options".into(), Value::Object(runtime_options));
            }
            Value::Object(payload)
        }
    }
}

/// Normalize one raw stream frame (one line off the wire) into a
/// [`NormalizedChunk`].
///
/// Returns `Ok(None)` for frames that carry nothing (SSE `event:` lines,
/// comments, ping events, `message_start`). SSE `data:` framing is
/// stripped here, so the client's read loop is family-agnostic: split on
/// newlines, feed every line through.
pub fn parse_stream_chunk(
    raw_frame: &str,
    family: ProviderFamily,
) -> Result<Option<NormalizedChunk>, ProviderError> {
    let line = raw_frame.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match family {
        ProviderFamily::Chat => {
            let Some(data) = line.strip_prefix("data:") else {
                // event:/comment lines carry no payload in this family.
                return Ok(None);
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(Some(NormalizedChunk::done_marker()));
            }
            let value: Value = serde_json::from_str(data)
                .map_err(|e| ProviderError::Parse(format!("bad chat frame: {e}")))?;
            Ok(Some(parse_chat_delta(&value)))
        }
        ProviderFamily::MessageDelta => {
            let Some(data) = line.strip_prefix("data:") else {
                return Ok(None);
            };
            let value: Value = serde_json::from_str(data.trim())
                .map_err(|e| ProviderError::Parse(format!("bad message-delta frame: {e}")))?;
            Ok(parse_message_delta_event(&value))
        }
        ProviderFamily::LocalRuntime => {
            // Raw NDJSON — the whole line is the frame.
            let value: Value = serde_json::from_str(line)
                .map_err(|e| ProviderError::Parse(format!("bad local-runtime frame: {e}")))?;
            Ok(Some(parse_local_runtime_frame(&value)))
        }
    }
}

fn parse_chat_delta(value: &Value) -> NormalizedChunk {
    let choice = &value["choices"][0];
    let delta = &choice["delta"];

    let tool_calls = delta["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|c| ToolCallRequest {
                    id: c["id"].as_str().map(String::from),
                    name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: c["function"]["arguments"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    NormalizedChunk {
        content: delta["content"].as_str().map(String::from),
        reasoning_content: delta["reasoning_content"]
            .as_str()
            .or_else(|| delta["reasoning"].as_str())
            .map(String::from),
        tool_calls,
        usage: parse_usage(&value["usage"], "prompt_tokens", "completion_tokens"),
        done: !choice["finish_reason"].is_null(),
    }
}

fn parse_message_delta_event(value: &Value) -> Option<NormalizedChunk> {
    match value["type"].as_str()? {
        "message_start" => {
            let usage = parse_usage(&value["message"]["usage"], "input_tokens", "output_tokens")?;
            Some(NormalizedChunk { usage: Some(usage), ..Default::default() })
        }
        "content_block_start" => {
            let block = &value["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Some(NormalizedChunk {
                    tool_calls: vec![ToolCallRequest {
                        id: block["id"].as_str().map(String::from),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: String::new(),
                    }],
                    ..Default::default()
                })
            } else {
                None
            }
        }
        "content_block_delta" => {
            let delta = &value["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => Some(NormalizedChunk {
                    content: delta["text"].as_str().map(String::from),
                    ..Default::default()
                }),
                Some("thinking_delta") => Some(NormalizedChunk {
                    reasoning_content: delta["thinking"].as_str().map(String::from),
                    ..Default::default()
                }),
                Some("input_json_delta") => Some(NormalizedChunk {
                    // Argument fragment for the tool call opened by the
                    // preceding content_block_start; name stays empty so
                    // the assembler appends instead of opening a new call.
                    tool_calls: vec![ToolCallRequest {
                        id: None,
                        name: String::new(),
                        arguments: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                    }],
                    ..Default::default()
                }),
                _ => None,
            }
        }
        "message_delta" => Some(NormalizedChunk {
            usage: parse_usage(&value["usage"], "input_tokens", "output_tokens"),
            ..Default::default()
        }),
        "message_stop" => Some(NormalizedChunk::done_marker()),
        // ping and anything future-shaped
        _ => None,
    }
}

fn parse_local_runtime_frame(value: &Value) -> NormalizedChunk {
    let message = &value["message"];
    let done = value["done"].as_bool().unwrap_or(false);

    let usage = if done {
        Some(Usage {
            input_tokens: value["prompt_eval_count"].as_u64(),
            output_tokens: value["eval_count"].as_u64(),
        })
    } else {
        None
    };

    NormalizedChunk {
        content: message["content"].as_str().filter(|s| !s.is_empty()).map(String::from),
        reasoning_content: message["thinking"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from),
        tool_calls: Vec::new(),
        usage,
        done,
    }
}

/// Normalize a whole non-streaming response body.
pub fn parse_completion(body: &Value, family: ProviderFamily) -> Result<Completion, ProviderError> {
    match family {
        ProviderFamily::Chat => {
            let message = &body["choices"][0]["message"];
            if message.is_null() {
                return Err(ProviderError::Parse("response has no choices".into()));
            }
            let tool_calls = message["tool_calls"]
                .as_array()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|c| ToolCallRequest {
                            id: c["id"].as_str().map(String::from),
                            name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                            arguments: c["function"]["arguments"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Completion {
                content: message["content"].as_str().unwrap_or_default().to_string(),
                reasoning_content: message["reasoning_content"]
                    .as_str()
                    .or_else(|| message["reasoning"].as_str())
                    .map(String::from),
                tool_calls,
                usage: parse_usage(&body["usage"], "prompt_tokens", "completion_tokens"),
            })
        }
        ProviderFamily::MessageDelta => {
            let blocks = body["content"]
                .as_array()
                .ok_or_else(|| ProviderError::Parse("response has no content blocks".into()))?;
            let mut content = String::new();
            let mut reasoning = String::new();
            let mut tool_calls = Vec::new();
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
                    Some("thinking") => {
                        reasoning.push_str(block["thinking"].as_str().unwrap_or_default())
                    }
                    Some("tool_use") => tool_calls.push(ToolCallRequest {
                        id: block["id"].as_str().map(String::from),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    }),
                    _ => {}
                }
            }
            Ok(Completion {
                content,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls,
                usage: parse_usage(&body["usage"], "input_tokens", "output_tokens"),
            })
        }
        ProviderFamily::LocalRuntime => {
            let message = &body["message"];
            if message.is_null() {
                return Err(ProviderError::Parse("response has no message".into()));
            }
            Ok(Completion {
                content: message["content"].as_str().unwrap_or_default().to_string(),
                reasoning_content: message["thinking"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(String::from),
                tool_calls: Vec::new(),
                usage: Some(Usage {
                    input_tokens: body["prompt_eval_count"].as_u64(),
                    output_tokens: body["eval_count"].as_u64(),
                }),
            })
        }
    }
}

fn parse_usage(value: &Value, input_key: &str, output_key: &str) -> Option<Usage> {
    if value.is_null() {
        return None;
    }
    let usage = Usage {
        input_tokens: value[input_key].as_u64(),
        output_tokens: value[output_key].as_u64(),
    };
    (!usage.is_empty()).then_some(usage)
}
