//! The orchestration loop: select a channel, relay, penalize, escalate.
//!
//! Each attempt draws from one priority tier; a retryable failure records a
//! penalty, excludes the channel for the rest of the request, and moves the
//! next draw one tier down. Once an upstream has produced a response (or
//! accepted a stream), orchestration is done and the handler takes over.

use std::collections::HashSet;
use std::future::Future;

use tracing::warn;

use relay_core::{RelayContext, RelayError, RelayMode, RelayResult};
use relay_store::Channel;

use crate::state::AppState;

/// A successful relay attempt plus the context it ran under.
#[derive(Debug)]
pub struct AttemptOutcome<T> {
    /// Whatever the attempt produced (response body or stream handle)
    pub value: T,
    /// Context of the winning attempt
    pub ctx: RelayContext,
    /// Attempts consumed, first try included
    pub attempts: u32,
}

/// Context for one attempt against `channel`.
fn attempt_context(
    state: &AppState,
    request_id: &str,
    mode: RelayMode,
    group: &str,
    public_model: &str,
    stream: bool,
    channel: &Channel,
) -> RelayContext {
    RelayContext {
        request_id: request_id.to_string(),
        mode,
        group: group.to_string(),
        public_model: public_model.to_string(),
        upstream_model: channel.upstream_model(public_model),
        channel_id: channel.id,
        channel_kind: channel.kind,
        base_url: channel.base_url.clone(),
        api_key: channel.api_key.clone(),
        stream,
        cache_discount: state.config.relay.cache_discount,
    }
}

/// Run `attempt` against freshly selected channels until it succeeds, the
/// error is terminal, or the attempt budget is spent.
///
/// Channels that fail are excluded for the remainder of this request, so a
/// retry never lands on the channel that just failed it. When exclusion
/// empties a tier the previous upstream error is returned rather than a
/// misleading `NoCandidates`.
pub async fn with_channel_retries<T, F, Fut>(
    state: &AppState,
    request_id: &str,
    mode: RelayMode,
    group: &str,
    public_model: &str,
    stream: bool,
    mut attempt: F,
) -> RelayResult<AttemptOutcome<T>>
where
    F: FnMut(RelayContext) -> Fut,
    Fut: Future<Output = RelayResult<T>>,
{
    let max_retries = state.config.routing.max_retries.max(1);
    let mut tried: HashSet<i64> = HashSet::new();
    let mut last_err: Option<RelayError> = None;

    for index in 0..max_retries {
        let selected = match state
            .selector
            .select(group, public_model, index, Some(&tried))
            .await
        {
            Ok(selected) => selected,
            Err(err) => return Err(last_err.unwrap_or(err)),
        };
        let channel = selected.channel;
        let ctx = attempt_context(state, request_id, mode, group, public_model, stream, &channel);
        state.tracker.update_channel(request_id, &channel.name);

        match attempt(ctx.clone()).await {
            Ok(value) => {
                state.metrics.record_attempt(ctx.channel_kind.as_str(), "ok");
                return Ok(AttemptOutcome {
                    value,
                    ctx,
                    attempts: index + 1,
                });
            }
            Err(err) => {
                state
                    .metrics
                    .record_attempt(ctx.channel_kind.as_str(), "error");
                if err.penalizes_channel() {
                    state.selector.ledger().record_failure(channel.id);
                }
                warn!(
                    request_id,
                    channel_id = channel.id,
                    channel = %channel.name,
                    attempt = index + 1,
                    error = %err,
                    "relay attempt failed"
                );
                if !err.is_retryable() {
                    return Err(err);
                }
                tried.insert(channel.id);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RelayError::NoCandidates {
        group: group.to_string(),
        model: public_model.to_string(),
    }))
}
