//! End-to-end SSE relay: identity, ordering, usage trailer, failover.

use pretty_assertions::assert_eq;
use serde_json::Value;
use wiremock::MockServer;

use crate::helpers::{chat_body, collect_sse, openai_draft, TestHub};
use crate::mock_upstreams::{chunk_frame, mount_chat_error, mount_chat_stream, usage_frame};

fn stream_body(model: &str) -> Value {
    let mut body = chat_body(model);
    body["stream"] = Value::Bool(true);
    body
}

#[tokio::test]
async fn stream_relays_ordered_chunks_under_one_identity() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_stream(&upstream, &[chunk_frame("Hel"), chunk_frame("lo")]).await;
    hub.insert_channel(openai_draft("stream", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &stream_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let payloads = collect_sse(response).await;
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).expect("chunk json"))
        .collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hel");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "lo");

    // Identity is assigned by the hub, not taken from the provider.
    let id = chunks[0]["id"].as_str().expect("id");
    assert!(id.starts_with("chatcmpl-"));
    assert_ne!(id, "chatcmpl-upstream-stream");
    assert_eq!(chunks[1]["id"], id);
    assert_eq!(chunks[0]["model"], "gpt-4o");
}

#[tokio::test]
async fn include_usage_emits_one_discounted_trailer() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_stream(&upstream, &[chunk_frame("hi"), usage_frame(100, 2, 40)]).await;
    hub.insert_channel(openai_draft("stream", &upstream.uri(), &["gpt-4o"]))
        .await;

    let mut body = stream_body("gpt-4o");
    body["stream_options"] = serde_json::json!({"include_usage": true});
    let response = hub.post_json("/v1/chat/completions", &body).await;
    assert_eq!(response.status().as_u16(), 200);

    let payloads = collect_sse(response).await;
    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).expect("chunk json"))
        .collect();
    // One content chunk plus the trailer; the provider's usage frame
    // itself is absorbed.
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].get("usage").map_or(true, Value::is_null));

    let trailer = &chunks[1];
    assert_eq!(trailer["choices"], serde_json::json!([]));
    // 40 cached tokens at the 0.85 discount: 100 - floor(40 * 0.85) = 66.
    assert_eq!(trailer["usage"]["prompt_tokens"], 66);
    assert_eq!(trailer["usage"]["completion_tokens"], 2);
    assert_eq!(trailer["usage"]["total_tokens"], 68);
}

#[tokio::test]
async fn without_include_usage_the_stream_has_no_trailer() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_stream(&upstream, &[chunk_frame("hi"), usage_frame(10, 1, 0)]).await;
    hub.insert_channel(openai_draft("stream", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &stream_body("gpt-4o"))
        .await;
    let payloads = collect_sse(response).await;
    // Content chunk and [DONE], nothing else.
    assert_eq!(payloads.len(), 2);
}

#[tokio::test]
async fn stream_fails_over_before_the_first_byte() {
    let hub = TestHub::start().await;

    let failing = MockServer::start().await;
    mount_chat_error(&failing, 500).await;
    let mut draft = openai_draft("stream-high", &failing.uri(), &["gpt-4o"]);
    draft.priority = 10;
    let high = hub.insert_channel(draft).await;

    let healthy = MockServer::start().await;
    mount_chat_stream(&healthy, &[chunk_frame("saved")]).await;
    hub.insert_channel(openai_draft("stream-low", &healthy.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &stream_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let payloads = collect_sse(response).await;
    let chunk: Value = serde_json::from_str(&payloads[0]).expect("chunk json");
    assert_eq!(chunk["choices"][0]["delta"]["content"], "saved");

    assert!(hub.state.selector.ledger().penalty_weight(high.id, 1000) > 0);
}

#[tokio::test]
async fn stream_rejection_uses_the_error_envelope() {
    let hub = TestHub::start().await;
    let failing = MockServer::start().await;
    mount_chat_error(&failing, 401).await;
    hub.insert_channel(openai_draft("stream", &failing.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &stream_body("gpt-4o"))
        .await;
    // Rejected before any SSE frame went out, so the client gets a plain
    // JSON error, not a stream.
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "upstream_error");
}

#[tokio::test]
async fn stream_completion_settles_the_request_tracker() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_stream(&upstream, &[chunk_frame("done"), usage_frame(5, 1, 0)]).await;
    hub.insert_channel(openai_draft("stream", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &stream_body("gpt-4o"))
        .await;
    collect_sse(response).await;

    // The summary watcher settles accounting shortly after the body ends.
    let mut settled = false;
    for _ in 0..50 {
        let stats = hub.state.tracker.stats();
        if stats.total_completed == 1 && stats.active_requests == 0 {
            settled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(settled, "stream accounting never settled");
}
