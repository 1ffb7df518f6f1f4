// crates/server/src/routes/chat.rs
//! Interactive streaming completion: one provider call proxied
//! token-by-token over SSE through the transport wrapper.
//!
//! `chunk` events carry `{reasoning, content, phase}` re-derived by the
//! progressive parser on every delta; `done` carries the finalized
//! reasoning/answer split plus usage and any tool calls.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use tracedeck_core::parsing::ProgressiveParser;
use tracedeck_core::provider::{
    ChatMessage, CompletionOptions, ProviderConfig, ProviderFamily, StreamAssembler,
};

use crate::error::StreamError;
use crate::sse::{stream_response, StreamHandle};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub provider: Option<ProviderFamily>,
    #[serde(default)]
    pub encrypted_api_key: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatStreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_response(move |handle| run_chat(state, body, handle))
}

async fn run_chat(
    state: Arc<AppState>,
    body: ChatStreamRequest,
    handle: StreamHandle,
) -> Result<Value, StreamError> {
    if body.messages.is_empty() {
        return Err(StreamError::invalid_request("messages must not be empty"));
    }
    if body.model.trim().is_empty() {
        return Err(StreamError::invalid_request("model is required"));
    }

    let api_key = match body.encrypted_api_key.as_deref() {
        Some(sealed) => Some(
            state
                .identity
                .decrypt_credential(sealed)
                .map_err(|e| StreamError::invalid_credential(e.to_string()))?,
        ),
        None => None,
    };

    let config = ProviderConfig {
        family: body.provider.unwrap_or(ProviderFamily::Chat),
        base_url: body.base_url.clone(),
        api_key,
    };
    let options = CompletionOptions {
        model: body.model.clone(),
        system: body.system.clone(),
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        stream: true,
        tools: None,
    };

    let (tx, mut rx) = mpsc::channel(64);
    let client = state.client.clone();
    let messages = body.messages;
    let cancel = handle.abort_token();
    let upstream =
        tokio::spawn(async move { client.stream(&config, &messages, &options, tx, cancel).await });

    // Ephemeral per-connection parse state: the accumulated buffer and the
    // phase are re-derived chunk by chunk, then destroyed with the stream.
    let mut parser = ProgressiveParser::new();
    let mut assembler = StreamAssembler::new();

    while let Some(chunk) = rx.recv().await {
        if handle.is_aborted() {
            break;
        }
        let delta = assembler.push(&chunk);
        if delta.is_empty() && !chunk.done {
            continue;
        }
        let view = parser.push(&delta);
        handle
            .send_chunk(json!({
                "reasoning": view.reasoning,
                "content": view.answer,
                "phase": view.phase.as_str(),
            }))
            .await;
    }

    // Unblock the upstream task if it is mid-send: a dropped receiver makes
    // its next send fail, which it treats as cancellation.
    drop(rx);
    let outcome = upstream
        .await
        .map_err(|e| StreamError::internal(format!("stream task failed: {e}")))?
        .map_err(|e| StreamError::from(&e))?;

    let final_split = parser.finalize();
    Ok(json!({
        "reasoning": final_split.reasoning,
        "answer": final_split.answer,
        "usage": outcome.usage,
        "toolCalls": outcome.tool_calls,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/stream", post(chat_stream))
}
