// crates/server/src/sse.rs
//! SSE transport wrapper.
//!
//! Connection lifecycle per stream: connecting → open → closing → closed,
//! with an orthogonal aborted flag. In axum terms: the stream is
//! "connecting" until its first frame is polled, "open" while frames
//! flow, "closing" once the terminal event is emitted, and "closed" when
//! the generator finishes — which also ends the keep-alive loop, so the
//! ping timer is never the last thing holding the process open.
//!
//! Disconnect detection: dropping the response stream is the only
//! authoritative client-disconnect signal here, and it cancels the abort
//! token via a drop guard. Failures to write individual keep-alive frames
//! are ignored — under chunked transfer they fire unreliably and treating
//! them as disconnects produces false aborts on slow-but-healthy
//! connections.
//!
//! The handler receives a [`StreamHandle`] (`send_chunk`, `is_aborted`,
//! `abort_token`) and either returns a result payload (emitted as `done`)
//! or an error (emitted as `error`). The wrapper guarantees exactly one
//! terminal event per connection — or none at all if the client aborted
//! first — and always closes the channel afterwards, whether or not the
//! handler ever checked the abort flag.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StreamError;

/// Keep-alive comment cadence. Sub-second so intermediaries never see an
/// idle connection worth reaping.
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before the second opening comment. The first frame forces the
/// channel open through buffering proxies; the second defeats client-side
/// connection-coalescing heuristics that wait for more than one frame.
const SECOND_OPEN_DELAY: Duration = Duration::from_millis(150);

enum Frame {
    Chunk(Value),
    Done(Value),
    Error(StreamError),
}

/// The business-logic side of one stream connection.
#[derive(Clone)]
pub struct StreamHandle {
    tx: mpsc::Sender<Frame>,
    abort: CancellationToken,
}

impl StreamHandle {
    /// Emit an incremental `chunk` event. Send failures mean the client
    /// is gone; the handler will observe that via `is_aborted`.
    pub async fn send_chunk(&self, data: Value) {
        let _ = self.tx.send(Frame::Chunk(data)).await;
    }

    /// Whether the client disconnected (or the connection was torn down).
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Token for plumbing into cancellable calls (provider streams).
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }
}

/// Wrap a handler into an SSE response.
pub fn stream_response<F, Fut>(handler: F) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: FnOnce(StreamHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, StreamError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Frame>(64);
    let abort = CancellationToken::new();
    let handle = StreamHandle { tx: tx.clone(), abort: abort.clone() };

    // The handler runs detached from the response stream; the wrapper owns
    // the single terminal emission. If the client is already gone the send
    // fails silently — that is the abort-before-completion case, where no
    // terminal event is due.
    tokio::spawn(async move {
        let frame = match handler(handle).await {
            Ok(value) => Frame::Done(value),
            Err(error) => Frame::Error(error),
        };
        let _ = tx.send(frame).await;
    });

    Sse::new(frame_stream(rx, abort))
}

fn frame_stream(
    mut rx: mpsc::Receiver<Frame>,
    abort: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Dropped with the stream — client disconnects cancel the token.
        let _disconnect_guard = abort.drop_guard();

        let mut events_sent: u64 = 0;

        // Immediate comment to force the channel open.
        yield Ok(Event::default().comment("ok"));

        let second_open = tokio::time::sleep(SECOND_OPEN_DELAY);
        tokio::pin!(second_open);
        let mut second_open_sent = false;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = &mut second_open, if !second_open_sent => {
                    second_open_sent = true;
                    yield Ok(Event::default().comment("connected"));
                }
                _ = ping.tick() => {
                    yield Ok(Event::default().comment("ping"));
                }
                frame = rx.recv() => {
                    match frame {
                        Some(Frame::Chunk(value)) => {
                            events_sent += 1;
                            yield Ok(Event::default().event("chunk").data(value.to_string()));
                        }
                        Some(Frame::Done(value)) => {
                            events_sent += 1;
                            debug!(events_sent, "stream closing: done");
                            yield Ok(Event::default().event("done").data(value.to_string()));
                            break;
                        }
                        Some(Frame::Error(error)) => {
                            events_sent += 1;
                            debug!(events_sent, code = ?error.code, "stream closing: error");
                            let payload = serde_json::to_string(&error)
                                .unwrap_or_else(|_| "{\"code\":\"provider-error\"}".into());
                            yield Ok(Event::default().event("error").data(payload));
                            break;
                        }
                        // Sender dropped without a terminal frame — close.
                        None => break,
                    }
                }
            }
        }
    }
}
