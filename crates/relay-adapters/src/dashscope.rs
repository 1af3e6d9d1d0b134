//! Alibaba DashScope (Qwen family) upstreams.
//!
//! DashScope does not speak the OpenAI wire format: requests wrap the
//! conversation in an `input` envelope with tuning knobs under
//! `parameters`, responses come back as an `output` envelope, and stream
//! frames carry the whole transcript so far in `output.text`. This adapter
//! maps both directions and reduces the cumulative stream to increments.

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{
    new_stream_id, ChatChoice, ChatChunk, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    EmbeddingData, EmbeddingsRequest, EmbeddingsResponse, RelayContext, RelayError, RelayMode,
    RelayResult, ResponseMessage, Usage,
};

use crate::adapter::{insert_bearer, RelayAdapter, StreamState};

static SSE_HEADER: HeaderName = HeaderName::from_static("x-dashscope-sse");

/// Adapter for DashScope endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct DashScopeAdapter;

impl DashScopeAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RelayAdapter for DashScopeAdapter {
    fn build_url(&self, ctx: &RelayContext) -> String {
        match ctx.mode {
            RelayMode::ChatCompletions => format!(
                "{}/api/v1/services/aigc/text-generation/generation",
                ctx.base_url
            ),
            RelayMode::Embeddings => format!(
                "{}/api/v1/services/embeddings/text-embedding/text-embedding",
                ctx.base_url
            ),
        }
    }

    fn setup_headers(&self, ctx: &RelayContext, headers: &mut HeaderMap) -> RelayResult<()> {
        insert_bearer(ctx, headers)?;
        if ctx.stream {
            headers.insert(SSE_HEADER.clone(), HeaderValue::from_static("enable"));
        }
        Ok(())
    }

    fn convert_chat(&self, ctx: &RelayContext, request: &ChatRequest) -> RelayResult<Value> {
        let messages = request
            .messages
            .iter()
            .map(|msg| DashScopeMessage {
                role: msg.role.to_string(),
                content: msg.text_content(),
            })
            .collect();
        let body = DashScopeChatRequest {
            model: ctx.upstream_model.clone(),
            input: DashScopeInput { messages },
            parameters: DashScopeParameters {
                temperature: request.temperature,
                top_p: request.top_p,
                max_tokens: request.max_tokens,
                stop: request.stop.clone(),
            },
        };
        serde_json::to_value(&body)
            .map_err(|err| RelayError::invalid(format!("unserializable chat request: {err}")))
    }

    fn convert_embeddings(
        &self,
        ctx: &RelayContext,
        request: &EmbeddingsRequest,
    ) -> RelayResult<Value> {
        let body = DashScopeEmbeddingsRequest {
            model: ctx.upstream_model.clone(),
            input: DashScopeEmbeddingsInput {
                texts: input_texts(&request.input)?,
            },
            parameters: DashScopeEmbeddingsParameters { text_type: "query" },
        };
        serde_json::to_value(&body)
            .map_err(|err| RelayError::invalid(format!("unserializable embeddings request: {err}")))
    }

    fn decode_chat(&self, ctx: &RelayContext, body: &[u8]) -> RelayResult<ChatResponse> {
        let resp: DashScopeChatResponse = serde_json::from_slice(body).map_err(RelayError::decode)?;
        let id = if resp.request_id.is_empty() {
            new_stream_id()
        } else {
            format!("chatcmpl-{}", resp.request_id)
        };
        Ok(ChatResponse {
            id,
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: ctx.upstream_model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ResponseMessage::assistant(resp.output.text),
                finish_reason: normalize_finish(resp.output.finish_reason),
            }],
            usage: resp.usage.map(Into::into),
            system_fingerprint: None,
        })
    }

    fn decode_embeddings(
        &self,
        ctx: &RelayContext,
        body: &[u8],
    ) -> RelayResult<EmbeddingsResponse> {
        let resp: DashScopeEmbeddingsResponse =
            serde_json::from_slice(body).map_err(RelayError::decode)?;
        let total = resp
            .usage
            .map(|u| if u.total_tokens > 0 { u.total_tokens } else { u.input_tokens })
            .unwrap_or_default();
        Ok(EmbeddingsResponse {
            object: "list".to_string(),
            data: resp
                .output
                .embeddings
                .into_iter()
                .map(|e| EmbeddingData::new(e.text_index, e.embedding))
                .collect(),
            model: ctx.upstream_model.clone(),
            usage: Usage {
                prompt_tokens: total,
                completion_tokens: 0,
                total_tokens: total,
                ..Usage::default()
            },
        })
    }

    fn decode_chunk(
        &self,
        _ctx: &RelayContext,
        payload: &str,
        state: &mut StreamState,
    ) -> RelayResult<Option<ChatChunk>> {
        let frame: DashScopeChatResponse =
            serde_json::from_str(payload).map_err(RelayError::decode)?;
        let delta = state.diff_cumulative(&frame.output.text);
        let finish = normalize_finish(frame.output.finish_reason);
        let usage = frame.usage.map(Into::into);

        let mut choices = Vec::new();
        if delta.is_some() || finish.is_some() {
            choices.push(ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: delta,
                    tool_calls: None,
                },
                finish_reason: finish,
            });
        }
        // Identity fields are stamped by the stream relay.
        Ok(Some(ChatChunk {
            id: String::new(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: String::new(),
            choices,
            usage,
        }))
    }
}

/// DashScope reports `finish_reason: "null"` (the string) until the final
/// frame.
fn normalize_finish(reason: Option<String>) -> Option<String> {
    reason.filter(|r| !r.is_empty() && r != "null")
}

fn input_texts(input: &Value) -> RelayResult<Vec<String>> {
    match input {
        Value::String(text) => Ok(vec![text.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    RelayError::invalid("embeddings input items must be strings")
                })
            })
            .collect(),
        _ => Err(RelayError::invalid(
            "embeddings input must be a string or an array of strings",
        )),
    }
}

#[derive(Debug, Serialize)]
struct DashScopeChatRequest {
    model: String,
    input: DashScopeInput,
    parameters: DashScopeParameters,
}

#[derive(Debug, Serialize)]
struct DashScopeInput {
    messages: Vec<DashScopeMessage>,
}

#[derive(Debug, Serialize)]
struct DashScopeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct DashScopeParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DashScopeChatResponse {
    output: DashScopeOutput,
    #[serde(default)]
    usage: Option<DashScopeUsage>,
    #[serde(default)]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct DashScopeUsage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

impl From<DashScopeUsage> for Usage {
    fn from(usage: DashScopeUsage) -> Self {
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.input_tokens + usage.output_tokens
        };
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: total,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct DashScopeEmbeddingsRequest {
    model: String,
    input: DashScopeEmbeddingsInput,
    parameters: DashScopeEmbeddingsParameters,
}

#[derive(Debug, Serialize)]
struct DashScopeEmbeddingsInput {
    texts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DashScopeEmbeddingsParameters {
    text_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct DashScopeEmbeddingsResponse {
    output: DashScopeEmbeddingsOutput,
    #[serde(default)]
    usage: Option<DashScopeUsage>,
}

#[derive(Debug, Deserialize)]
struct DashScopeEmbeddingsOutput {
    embeddings: Vec<DashScopeEmbedding>,
}

#[derive(Debug, Deserialize)]
struct DashScopeEmbedding {
    text_index: u32,
    embedding: Vec<f32>,
}
