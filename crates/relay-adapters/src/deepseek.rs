//! DeepSeek upstreams.
//!
//! DeepSeek speaks the OpenAI wire format with two twists the hub has to
//! absorb: usage reports carry `prompt_cache_hit_tokens` /
//! `prompt_cache_miss_tokens` (billed at a discount, normalized centrally),
//! and stream frames may repeat the whole transcript so far instead of
//! sending increments. The chunk decoder reduces those snapshots to true
//! deltas before anything reaches the client.

use reqwest::header::HeaderMap;
use serde_json::Value;

use relay_core::{
    ChatChunk, ChatRequest, ChatResponse, EmbeddingsRequest, RelayContext, RelayError, RelayMode,
    RelayResult,
};

use crate::adapter::{insert_bearer, RelayAdapter, StreamState};

/// Adapter for DeepSeek endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeepSeekAdapter;

impl DeepSeekAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RelayAdapter for DeepSeekAdapter {
    fn build_url(&self, ctx: &RelayContext) -> String {
        // DeepSeek mounts the OpenAI paths at the root, without /v1.
        match ctx.mode {
            RelayMode::ChatCompletions => format!("{}/chat/completions", ctx.base_url),
            RelayMode::Embeddings => format!("{}/embeddings", ctx.base_url),
        }
    }

    fn setup_headers(&self, ctx: &RelayContext, headers: &mut HeaderMap) -> RelayResult<()> {
        insert_bearer(ctx, headers)
    }

    fn convert_chat(&self, ctx: &RelayContext, request: &ChatRequest) -> RelayResult<Value> {
        let mut request = request.clone();
        request.model.clone_from(&ctx.upstream_model);
        serde_json::to_value(&request)
            .map_err(|err| RelayError::invalid(format!("unserializable chat request: {err}")))
    }

    fn convert_embeddings(
        &self,
        ctx: &RelayContext,
        request: &EmbeddingsRequest,
    ) -> RelayResult<Value> {
        let mut request = request.clone();
        request.model.clone_from(&ctx.upstream_model);
        serde_json::to_value(&request)
            .map_err(|err| RelayError::invalid(format!("unserializable embeddings request: {err}")))
    }

    fn decode_chat(&self, _ctx: &RelayContext, body: &[u8]) -> RelayResult<ChatResponse> {
        serde_json::from_slice(body).map_err(RelayError::decode)
    }

    fn decode_chunk(
        &self,
        _ctx: &RelayContext,
        payload: &str,
        state: &mut StreamState,
    ) -> RelayResult<Option<ChatChunk>> {
        let mut chunk: ChatChunk = serde_json::from_str(payload).map_err(RelayError::decode)?;
        // Content fields hold cumulative transcripts; keep only the part
        // the client has not seen yet.
        for choice in &mut chunk.choices {
            if let Some(full) = choice.delta.content.take() {
                choice.delta.content = state.diff_cumulative(&full);
            }
        }
        let informative = chunk.usage.is_some()
            || chunk.choices.iter().any(|choice| {
                choice.finish_reason.is_some()
                    || choice.delta.content.is_some()
                    || choice.delta.role.is_some()
                    || choice.delta.tool_calls.is_some()
            });
        Ok(informative.then_some(chunk))
    }
}
