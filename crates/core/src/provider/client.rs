// crates/core/src/provider/client.rs
//! HTTP client over the adapter: non-streaming completions and
//! token-by-token streaming with cooperative cancellation.
//!
//! Retry policy at this layer: exponential backoff (`base * 2^attempt`)
//! applied to the initial connection/handshake only. Mid-stream failures
//! are surfaced, not retried; 4xx responses other than 429 are surfaced
//! immediately; once the cancellation token fires no further attempt is
//! made. This is deliberately separate from the batch pipeline's
//! fixed-delay per-item retry — interactive calls tolerate longer waits,
//! batch items need bounded latency.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;
use super::adapter;
use super::assembler::{StreamAssembler, StreamOutcome};
use super::types::{ChatMessage, Completion, CompletionOptions, NormalizedChunk, ProviderFamily};

const DEFAULT_CONNECT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request ceiling for non-streaming calls. Streams get no overall
/// timeout — a healthy stream can legitimately run for minutes.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(180);

/// Error bodies can be huge HTML pages; keep what's useful for logs.
const MAX_ERROR_BODY: usize = 400;

/// Where and how to reach one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub family: ProviderFamily,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Shared provider HTTP client. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    connect_retries: u32,
    backoff_base: Duration,
}

impl ProviderClient {
    pub fn new() -> Self {
        Self::with_retry_policy(DEFAULT_CONNECT_RETRIES, DEFAULT_BACKOFF_BASE)
    }

    /// Mainly for tests — shrink the backoff so retry paths run fast.
    pub fn with_retry_policy(connect_retries: u32, backoff_base: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { http, connect_retries, backoff_base }
    }

    /// One non-streaming completion, normalized.
    pub async fn complete(
        &self,
        config: &ProviderConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let mut options = options.clone();
        options.stream = false;
        let payload = adapter::build_payload(messages, &options, config.family);

        let response = self.send_with_backoff(config, &payload, None, true).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("invalid response body: {e}")))?;
        adapter::parse_completion(&body, config.family)
    }

    /// Stream one completion. Normalized chunks are pushed into `tx` as
    /// they arrive; the accumulated outcome (synthesized text buffer,
    /// merged usage, assembled tool calls) is returned at the end.
    ///
    /// Cancellation is immediate and forcible: when `cancel` fires the
    /// in-flight read is dropped, which tears down the upstream
    /// connection. A dropped receiver is treated the same way.
    pub async fn stream(
        &self,
        config: &ProviderConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        tx: mpsc::Sender<NormalizedChunk>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, ProviderError> {
        let mut options = options.clone();
        options.stream = true;
        let payload = adapter::build_payload(messages, &options, config.family);

        let response = self
            .send_with_backoff(config, &payload, Some(&cancel), false)
            .await?;

        let mut assembler = StreamAssembler::new();
        let mut body = response.bytes_stream();
        let mut pending = String::new();

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                item = body.next() => item,
            };
            let Some(item) = item else { break };
            let bytes = item.map_err(|e| ProviderError::Network(format!("mid-stream: {e}")))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                let Some(chunk) = adapter::parse_stream_chunk(line, config.family)? else {
                    continue;
                };
                let done = chunk.done;
                assembler.push(&chunk);
                if tx.send(chunk).await.is_err() {
                    debug!("chunk receiver dropped, aborting upstream read");
                    return Err(ProviderError::Cancelled);
                }
                if done {
                    return Ok(assembler.finish());
                }
            }
        }

        // Stream ended without an explicit done frame — still usable.
        Ok(assembler.finish())
    }

    /// POST with exponential backoff on the handshake.
    async fn send_with_backoff(
        &self,
        config: &ProviderConfig,
        payload: &serde_json::Value,
        cancel: Option<&CancellationToken>,
        bounded: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let endpoint = adapter::build_endpoint(&config.base_url, config.family);
        let headers = adapter::build_headers(config.api_key.as_deref(), config.family);

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(ProviderError::Cancelled);
            }

            let mut request = self.http.post(&endpoint).json(payload);
            if bounded {
                request = request.timeout(COMPLETION_TIMEOUT);
            }
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let mut text = response.text().await.unwrap_or_default();
                    text.truncate(MAX_ERROR_BODY);
                    ProviderError::from_status(status, text)
                }
                Err(e) => ProviderError::from(e),
            };

            if !error.retryable() || attempt >= self.connect_retries {
                return Err(error);
            }
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(ProviderError::Cancelled);
            }

            let delay = self.backoff_base * 2u32.saturating_pow(attempt);
            warn!(
                endpoint = %endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "provider handshake failed, backing off"
            );
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}
