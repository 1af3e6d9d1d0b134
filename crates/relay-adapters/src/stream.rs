//! The streaming relay state machine.
//!
//! Consumes an upstream SSE body, hands each `data:` payload to the
//! adapter's chunk decoder, and re-emits canonical chunks in arrival order
//! with stream identity assigned once up front. A producer task reads and
//! decodes; the caller consumes through a bounded channel, so a slow client
//! suspends the producer instead of buffering without limit. The only
//! liveness signal is line arrival: an inactivity timer guards the whole
//! stream and expiry abandons it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_core::{new_stream_id, ChatChunk, ChunkStream, RelayContext, RelayError, Usage};

use crate::adapter::{RelayAdapter, StreamState};

/// Lifecycle of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Upstream accepted the request; no chunk decoded yet
    AwaitingFirstByte,
    /// At least one chunk has been decoded and forwarded
    Streaming,
    /// Terminator received; trailing usage may still be emitted
    Draining,
    /// Clean end of stream
    Closed,
    /// The inactivity timer fired; the stream was abandoned
    TimedOut,
}

/// Terminal report of one relayed stream.
///
/// Delivered through the summary channel when the producer stops, whatever
/// the reason. `phase` is the last phase reached: anything other than
/// [`StreamPhase::Closed`] or [`StreamPhase::TimedOut`] means the stream
/// was cut off mid-flight.
#[derive(Debug)]
pub struct StreamSummary {
    /// Last phase the relay reached
    pub phase: StreamPhase,
    /// Delay between dispatch and the first decoded chunk
    pub first_byte: Option<Duration>,
    /// Final usage with normalization applied; `None` if never reported
    pub usage: Option<Usage>,
    /// Full text emitted downstream
    pub text: String,
    /// Tool-call fragments forwarded
    pub tool_call_fragments: usize,
    /// Lines dropped because they failed to decode
    pub skipped_lines: usize,
    /// Upstream-attributable failure that ended the stream, if any
    pub failure: Option<String>,
}

impl StreamSummary {
    /// Whether the stream ran to a clean end.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.phase == StreamPhase::Closed && self.failure.is_none()
    }
}

/// Per-stream tunables, resolved by the upstream client.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamSettings {
    pub idle_timeout: Duration,
    pub buffer: usize,
    pub include_usage: bool,
}

/// A live normalized stream plus the promise of its terminal summary.
pub struct StreamHandle {
    /// Canonical chunks in upstream arrival order
    pub chunks: ChunkStream,
    /// Resolves when the producer stops; dropped without a value if the
    /// producer was aborted before finishing
    pub summary: oneshot::Receiver<StreamSummary>,
}

/// Spawn the producer over an accepted upstream response and wrap it into
/// a [`StreamHandle`].
///
/// Dropping the returned chunk stream aborts the producer, which releases
/// the upstream connection; a disconnected client never leaves a reader
/// parked on a silent socket.
pub(crate) fn relay_sse(
    adapter: Arc<dyn RelayAdapter>,
    ctx: RelayContext,
    response: reqwest::Response,
    settings: StreamSettings,
) -> StreamHandle {
    let (chunk_tx, mut chunk_rx) = mpsc::channel(settings.buffer.max(1));
    let (summary_tx, summary_rx) = oneshot::channel();

    let producer = tokio::spawn(produce(adapter, ctx, response, settings, chunk_tx, summary_tx));

    // The guard travels inside the consumer stream: dropping the stream,
    // polled or not, aborts the producer and releases the upstream socket.
    let guard = AbortOnDrop(producer);
    let chunks = stream! {
        let _guard = guard;
        while let Some(item) = chunk_rx.recv().await {
            yield item;
        }
    };

    StreamHandle {
        chunks: chunks.boxed(),
        summary: summary_rx,
    }
}

#[allow(clippy::too_many_lines)]
async fn produce(
    adapter: Arc<dyn RelayAdapter>,
    ctx: RelayContext,
    response: reqwest::Response,
    settings: StreamSettings,
    chunks: mpsc::Sender<Result<ChatChunk, RelayError>>,
    summary: oneshot::Sender<StreamSummary>,
) {
    let started = Instant::now();
    // Stream identity is chosen once and stamped on every chunk.
    let stream_id = new_stream_id();
    let created = Utc::now().timestamp();

    let mut phase = StreamPhase::AwaitingFirstByte;
    let mut state = StreamState::new();
    let mut merged = Usage::default();
    let mut first_byte: Option<Duration> = None;
    let mut tool_call_fragments = 0usize;
    let mut skipped_lines = 0usize;
    let mut failure: Option<String> = None;

    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    let idle = tokio::time::sleep(settings.idle_timeout);
    tokio::pin!(idle);

    'read: loop {
        tokio::select! {
            received = body.next() => match received {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        // Line arrival is the liveness signal.
                        idle.as_mut()
                            .reset(tokio::time::Instant::now() + settings.idle_timeout);

                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim();
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim();
                        if payload == "[DONE]" {
                            phase = StreamPhase::Draining;
                            break 'read;
                        }

                        match adapter.decode_chunk(&ctx, payload, &mut state) {
                            Ok(decoded) => {
                                if first_byte.is_none() {
                                    first_byte = Some(started.elapsed());
                                    phase = StreamPhase::Streaming;
                                }
                                let Some(mut chunk) = decoded else { continue };
                                // Usage is re-emitted once at stream end, so
                                // strip it from forwarded chunks here.
                                if let Some(usage) = chunk.usage.take() {
                                    merged.merge_latest(&usage);
                                }
                                if chunk.choices.is_empty() {
                                    continue;
                                }
                                tool_call_fragments += chunk
                                    .choices
                                    .iter()
                                    .filter_map(|c| c.delta.tool_calls.as_ref().map(Vec::len))
                                    .sum::<usize>();
                                chunk.id.clone_from(&stream_id);
                                chunk.created = created;
                                chunk.model.clone_from(&ctx.upstream_model);
                                if chunks.send(Ok(chunk)).await.is_err() {
                                    debug!(
                                        request_id = %ctx.request_id,
                                        "downstream receiver dropped, stopping relay"
                                    );
                                    break 'read;
                                }
                            }
                            Err(err) => {
                                skipped_lines += 1;
                                debug!(
                                    request_id = %ctx.request_id,
                                    channel_id = ctx.channel_id,
                                    error = %err,
                                    "skipping undecodable stream line"
                                );
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    let err = RelayError::transport(err);
                    warn!(
                        request_id = %ctx.request_id,
                        channel_id = ctx.channel_id,
                        error = %err,
                        "upstream body failed mid-stream"
                    );
                    failure = Some(err.to_string());
                    let _ = chunks.send(Err(err)).await;
                    break 'read;
                }
                None => {
                    // Upstream ended without the terminator; drain as if it
                    // had been sent.
                    debug!(
                        request_id = %ctx.request_id,
                        channel_id = ctx.channel_id,
                        "upstream closed without stream terminator"
                    );
                    phase = StreamPhase::Draining;
                    break 'read;
                }
            },
            () = &mut idle => {
                let err = RelayError::StreamIdle {
                    elapsed: settings.idle_timeout,
                };
                warn!(
                    request_id = %ctx.request_id,
                    channel_id = ctx.channel_id,
                    timeout = ?settings.idle_timeout,
                    "stream went idle, abandoning upstream"
                );
                failure = Some(err.to_string());
                let _ = chunks.send(Err(err)).await;
                phase = StreamPhase::TimedOut;
                break 'read;
            }
        }
    }

    // Normalize once at stream end; the trailing chunk and the summary see
    // the same figures.
    let usage = if merged.is_empty() {
        None
    } else {
        merged.apply_cache_discount(ctx.cache_discount);
        Some(merged)
    };

    if phase == StreamPhase::Draining {
        if settings.include_usage {
            if let Some(usage) = usage {
                let trailer =
                    ChatChunk::usage_only(stream_id, created, ctx.upstream_model.clone(), usage);
                let _ = chunks.send(Ok(trailer)).await;
            }
        }
        phase = StreamPhase::Closed;
    }

    debug!(
        request_id = %ctx.request_id,
        channel_id = ctx.channel_id,
        phase = ?phase,
        skipped = skipped_lines,
        "stream relay finished"
    );

    let _ = summary.send(StreamSummary {
        phase,
        first_byte,
        usage,
        text: state.into_text(),
        tool_call_fragments,
        skipped_lines,
        failure,
    });
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
