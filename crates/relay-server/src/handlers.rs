//! Relay-facing HTTP handlers.
//!
//! Chat and embeddings handlers validate, run the channel retry loop, and
//! settle metrics and tracking once the upstream answers. Streams return
//! immediately after the upstream accepts; accounting for them settles in a
//! background task when the stream summary resolves.

use std::convert::Infallible;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::StreamExt;
use serde_json::json;
use tracing::{debug, instrument, warn};

use relay_adapters::StreamHandle;
use relay_core::{ChatRequest, EmbeddingsRequest, ModelsResponse, RelayMode, Usage};
use relay_telemetry::{RequestInfo, RequestMetrics};

use crate::error::ApiError;
use crate::extractors::{JsonBody, RelayGroup, RequestId};
use crate::relay::with_channel_retries;
use crate::state::AppState;
use crate::stream_session;

/// `POST /v1/chat/completions`
#[instrument(skip_all, fields(request_id = %request_id, model = %request.model, group = %group))]
pub async fn chat_completions(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    RelayGroup(group): RelayGroup,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Response {
    if let Err(err) = request.validate() {
        return ApiError::from(err).into_response();
    }

    let started = Instant::now();
    state.metrics.inc_in_flight();
    state.tracker.start(
        RequestInfo::new(request_id.clone(), request.model.clone()).with_streaming(request.stream),
    );

    if request.stream {
        relay_chat_stream(state, request_id, group, request, started).await
    } else {
        relay_chat_batch(state, request_id, group, request, started).await
    }
}

async fn relay_chat_batch(
    state: AppState,
    request_id: String,
    group: String,
    request: ChatRequest,
    started: Instant,
) -> Response {
    let client = state.client.clone();
    let outcome = with_channel_retries(
        &state,
        &request_id,
        RelayMode::ChatCompletions,
        &group,
        &request.model,
        false,
        |ctx| {
            let client = client.clone();
            let request = request.clone();
            async move { client.relay_chat(&ctx, &request).await }
        },
    )
    .await;

    match outcome {
        Ok(outcome) => {
            let mut response = outcome.value;
            response.model.clone_from(&outcome.ctx.upstream_model);
            settle_success(
                &state,
                &request_id,
                RelayMode::ChatCompletions,
                &request.model,
                outcome.ctx.channel_kind.as_str(),
                started,
                false,
                response.usage,
            );
            Json(response).into_response()
        }
        Err(err) => settle_failure(
            &state,
            &request_id,
            RelayMode::ChatCompletions,
            &request.model,
            started,
            false,
            err.into(),
        ),
    }
}

async fn relay_chat_stream(
    state: AppState,
    request_id: String,
    group: String,
    request: ChatRequest,
    started: Instant,
) -> Response {
    let client = state.client.clone();
    let outcome = with_channel_retries(
        &state,
        &request_id,
        RelayMode::ChatCompletions,
        &group,
        &request.model,
        true,
        |ctx| {
            let client = client.clone();
            let request = request.clone();
            async move { client.relay_chat_stream(&ctx, &request).await }
        },
    )
    .await;

    let model = request.model;
    match outcome {
        Ok(outcome) => {
            let StreamHandle { chunks, summary } = outcome.value;
            stream_session::watch(state, outcome.ctx, model, summary, started);
            sse_response(chunks)
        }
        Err(err) => settle_failure(
            &state,
            &request_id,
            RelayMode::ChatCompletions,
            &model,
            started,
            true,
            err.into(),
        ),
    }
}

/// Wrap the normalized chunk stream into an SSE response.
///
/// Chunks go out as `data:` frames; a mid-stream relay error becomes one
/// error frame in the usual envelope, and `[DONE]` always terminates the
/// stream.
fn sse_response(chunks: relay_core::ChunkStream) -> Response {
    let frames = chunks
        .map(|item| {
            let payload = match item {
                Ok(chunk) => serde_json::to_string(&chunk)
                    .unwrap_or_else(|e| ApiError::internal(e.to_string()).body().to_string()),
                Err(err) => ApiError::from(err).body().to_string(),
            };
            Ok::<_, Infallible>(Event::default().data(payload))
        })
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));
    Sse::new(frames).keep_alive(KeepAlive::default()).into_response()
}

/// `POST /v1/embeddings`
#[instrument(skip_all, fields(request_id = %request_id, model = %request.model, group = %group))]
pub async fn embeddings(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    RelayGroup(group): RelayGroup,
    JsonBody(request): JsonBody<EmbeddingsRequest>,
) -> Response {
    if let Err(err) = request.validate() {
        return ApiError::from(err).into_response();
    }

    let started = Instant::now();
    state.metrics.inc_in_flight();
    state
        .tracker
        .start(RequestInfo::new(request_id.clone(), request.model.clone()));

    let client = state.client.clone();
    let outcome = with_channel_retries(
        &state,
        &request_id,
        RelayMode::Embeddings,
        &group,
        &request.model,
        false,
        |ctx| {
            let client = client.clone();
            let request = request.clone();
            async move { client.relay_embeddings(&ctx, &request).await }
        },
    )
    .await;

    match outcome {
        Ok(outcome) => {
            let mut response = outcome.value;
            response.model.clone_from(&outcome.ctx.upstream_model);
            settle_success(
                &state,
                &request_id,
                RelayMode::Embeddings,
                &request.model,
                outcome.ctx.channel_kind.as_str(),
                started,
                false,
                Some(response.usage),
            );
            Json(response).into_response()
        }
        Err(err) => settle_failure(
            &state,
            &request_id,
            RelayMode::Embeddings,
            &request.model,
            started,
            false,
            err.into(),
        ),
    }
}

/// `GET /v1/models`
pub async fn list_models(
    State(state): State<AppState>,
    RelayGroup(group): RelayGroup,
) -> Result<Json<ModelsResponse>, ApiError> {
    let ids = state.store.list_models(Some(&group)).await?;
    debug!(group, models = ids.len(), "listed models");
    Ok(Json(ModelsResponse::from_ids(ids)))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => {
            let stats = state.tracker.stats();
            Json(json!({
                "status": "ok",
                "active_requests": stats.active_requests,
                "total_completed": stats.total_completed,
            }))
            .into_response()
        }
        Err(err) => {
            warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "reason": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
        .into_response()
}

#[allow(clippy::too_many_arguments)]
fn settle_success(
    state: &AppState,
    request_id: &str,
    mode: RelayMode,
    model: &str,
    channel_kind: &str,
    started: Instant,
    streaming: bool,
    usage: Option<Usage>,
) {
    state.metrics.record_request(&RequestMetrics {
        mode,
        model: model.to_string(),
        channel_kind: channel_kind.to_string(),
        latency: started.elapsed(),
        status_code: 200,
        streaming,
        usage,
    });
    state.tracker.complete_success(request_id, usage.as_ref());
    state.metrics.dec_in_flight();
}

fn settle_failure(
    state: &AppState,
    request_id: &str,
    mode: RelayMode,
    model: &str,
    started: Instant,
    streaming: bool,
    err: ApiError,
) -> Response {
    state.metrics.record_request(&RequestMetrics {
        mode,
        model: model.to_string(),
        channel_kind: "none".to_string(),
        latency: started.elapsed(),
        status_code: err.status.as_u16(),
        streaming,
        usage: None,
    });
    state
        .tracker
        .complete_error(request_id, err.status.as_u16(), &err.message);
    state.metrics.dec_in_flight();
    err.into_response()
}
