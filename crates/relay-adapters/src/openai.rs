//! OpenAI and OpenAI-compatible upstreams.
//!
//! The hub's canonical wire format is already the OpenAI one, so this
//! adapter is mostly pass-through: it substitutes the upstream model name
//! on the way out and records incremental deltas for the stream summary on
//! the way back.

use reqwest::header::HeaderMap;
use serde_json::Value;

use relay_core::{
    ChatChunk, ChatRequest, ChatResponse, EmbeddingsRequest, RelayContext, RelayError, RelayMode,
    RelayResult,
};

use crate::adapter::{insert_bearer, RelayAdapter, StreamState};

/// Adapter for OpenAI-compatible endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RelayAdapter for OpenAiAdapter {
    fn build_url(&self, ctx: &RelayContext) -> String {
        match ctx.mode {
            RelayMode::ChatCompletions => format!("{}/v1/chat/completions", ctx.base_url),
            RelayMode::Embeddings => format!("{}/v1/embeddings", ctx.base_url),
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
        let chunk: ChatChunk = serde_json::from_str(payload).map_err(RelayError::decode)?;
        // Deltas are already incremental; track them for the summary.
        state.push_delta(&chunk.content_text());
        Ok(Some(chunk))
    }
}
