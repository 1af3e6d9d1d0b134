//! Deferred accounting for streamed responses.
//!
//! A streaming handler returns as soon as the upstream accepts, so request
//! metrics and tracking cannot settle inline. This module spawns a watcher
//! on the stream summary channel and settles once the producer stops,
//! whether the stream closed cleanly, went idle, or the client walked away.

use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use relay_adapters::{StreamPhase, StreamSummary};
use relay_core::RelayContext;
use relay_telemetry::RequestMetrics;

use crate::state::AppState;

/// Client closed the connection before the stream finished.
const STATUS_CLIENT_CLOSED: u16 = 499;

/// Spawn the watcher for one accepted stream.
pub fn watch(
    state: AppState,
    ctx: RelayContext,
    model: String,
    summary: oneshot::Receiver<StreamSummary>,
    started: Instant,
) {
    tokio::spawn(async move {
        match summary.await {
            Ok(summary) => settle(&state, &ctx, &model, &summary, started),
            Err(_) => {
                // The producer was aborted before it could report, which
                // only happens when the consumer stream was dropped.
                debug!(
                    request_id = %ctx.request_id,
                    channel_id = ctx.channel_id,
                    "client disconnected mid-stream"
                );
                record(
                    &state,
                    &ctx,
                    &model,
                    STATUS_CLIENT_CLOSED,
                    None,
                    started,
                );
                state.tracker.complete_error(
                    &ctx.request_id,
                    STATUS_CLIENT_CLOSED,
                    "client disconnected",
                );
                state.metrics.dec_in_flight();
            }
        }
    });
}

fn settle(
    state: &AppState,
    ctx: &RelayContext,
    model: &str,
    summary: &StreamSummary,
    started: Instant,
) {
    if let Some(first_byte) = summary.first_byte {
        state
            .metrics
            .record_first_byte(ctx.channel_kind.as_str(), first_byte);
        state.tracker.record_first_token(&ctx.request_id);
    }

    if summary.is_clean() {
        record(state, ctx, model, 200, summary.usage, started);
        state
            .tracker
            .complete_success(&ctx.request_id, summary.usage.as_ref());
        state.metrics.dec_in_flight();
        return;
    }

    let status = if summary.phase == StreamPhase::TimedOut {
        // The upstream went silent after accepting the stream; that counts
        // against the channel like any other upstream failure.
        state.selector.ledger().record_failure(ctx.channel_id);
        504
    } else {
        502
    };
    let reason = summary.failure.as_deref().unwrap_or("stream cut off");
    warn!(
        request_id = %ctx.request_id,
        channel_id = ctx.channel_id,
        phase = ?summary.phase,
        status,
        reason,
        "stream ended uncleanly"
    );
    record(state, ctx, model, status, summary.usage, started);
    state.tracker.complete_error(&ctx.request_id, status, reason);
    state.metrics.dec_in_flight();
}

fn record(
    state: &AppState,
    ctx: &RelayContext,
    model: &str,
    status_code: u16,
    usage: Option<relay_core::Usage>,
    started: Instant,
) {
    state.metrics.record_request(&RequestMetrics {
        mode: ctx.mode,
        model: model.to_string(),
        channel_kind: ctx.channel_kind.as_str().to_string(),
        latency: started.elapsed(),
        status_code,
        streaming: true,
        usage,
    });
}
