//! Wiremock builders for OpenAI-shaped upstreams.

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount a successful batch chat completion answering with `text`.
pub async fn mount_chat_ok(server: &MockServer, text: &str, usage: Option<Value>) {
    let mut body = json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "upstream-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    });
    if let Some(usage) = usage {
        body["usage"] = usage;
    }
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a failing batch chat completion.
pub async fn mount_chat_error(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(json!({"error": {"message": "upstream says no"}})),
        )
        .mount(server)
        .await;
}

/// One OpenAI-style streaming chunk carrying a content delta.
#[must_use]
pub fn chunk_frame(text: &str) -> String {
    json!({
        "id": "chatcmpl-upstream-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "upstream-model",
        "choices": [{"index": 0, "delta": {"content": text}}]
    })
    .to_string()
}

/// An OpenAI-style usage-only streaming chunk.
#[must_use]
pub fn usage_frame(prompt: i64, completion: i64, cache_hit: i64) -> String {
    json!({
        "id": "chatcmpl-upstream-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "upstream-model",
        "choices": [],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
            "prompt_cache_hit_tokens": cache_hit
        }
    })
    .to_string()
}

/// Join frames into an SSE body ending with the `[DONE]` sentinel.
#[must_use]
pub fn sse_body(frames: &[String]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Mount a successful streaming chat completion replaying `frames`.
pub async fn mount_chat_stream(server: &MockServer, frames: &[String]) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(frames), "text/event-stream"),
        )
        .mount(server)
        .await;
}

/// Mount a successful embeddings endpoint answering `dims`-wide vectors.
pub async fn mount_embeddings_ok(server: &MockServer, dims: usize) {
    let body = json!({
        "object": "list",
        "data": [{
            "object": "embedding",
            "index": 0,
            "embedding": vec![0.25_f32; dims]
        }],
        "model": "upstream-model",
        "usage": {"prompt_tokens": 4, "completion_tokens": 0, "total_tokens": 4}
    });
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
