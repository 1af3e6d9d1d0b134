//! Batch relay surface: chat, embeddings, model listing, validation.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{chat_body, openai_draft, TestHub};
use crate::mock_upstreams::{mount_chat_error, mount_chat_ok, mount_embeddings_ok};

#[tokio::test]
async fn batch_chat_relays_through_the_selected_channel() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(
        &upstream,
        "hello from upstream",
        Some(json!({"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13})),
    )
    .await;
    hub.insert_channel(openai_draft("primary", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["choices"][0]["message"]["content"], "hello from upstream");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["usage"]["total_tokens"], 13);
}

#[tokio::test]
async fn authorization_and_mapped_model_reach_the_upstream() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-mapped"))
        .and(body_partial_json(json!({"model": "gpt-4o-internal"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-internal",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "mapped"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut draft = openai_draft("mapped", &upstream.uri(), &["gpt-4o"]);
    draft
        .model_mapping
        .insert("gpt-4o".to_string(), "gpt-4o-internal".to_string());
    hub.insert_channel(draft).await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    // The response reports the name the upstream actually served.
    assert_eq!(body["model"], "gpt-4o-internal");
}

#[tokio::test]
async fn embeddings_relay_returns_vectors_and_usage() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_embeddings_ok(&upstream, 3).await;
    hub.insert_channel(openai_draft("embed", &upstream.uri(), &["text-embed-1"]))
        .await;

    let body = json!({"model": "text-embed-1", "input": "embed me"});
    let response = hub.post_json("/v1/embeddings", &body).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["object"], "list");
    assert_eq!(
        body["data"][0]["embedding"].as_array().map(Vec::len),
        Some(3)
    );
    assert_eq!(body["usage"]["prompt_tokens"], 4);
}

#[tokio::test]
async fn groups_isolate_channels() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(&upstream, "vip only", None).await;
    let mut draft = openai_draft("vip", &upstream.uri(), &["gpt-4o"]);
    draft.groups = vec!["vip".to_string()];
    hub.insert_channel(draft).await;

    // The default group sees no candidates at all.
    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "no_available_channel");

    let response = hub
        .client
        .post(hub.url("/v1/chat/completions"))
        .header("x-relay-group", "vip")
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 200);

    // Model listings are scoped the same way.
    let response = hub.get("/v1/models").await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"], json!([]));

    let response = hub
        .client
        .get(hub.url("/v1/models"))
        .header("x-relay-group", "vip")
        .send()
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"][0]["id"], "gpt-4o");
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_selection() {
    let hub = TestHub::start().await;

    let body = json!({"model": "gpt-4o", "messages": []});
    let response = hub.post_json("/v1/chat/completions", &body).await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let body = json!({"model": "text-embed-1", "input": []});
    let response = hub.post_json("/v1/embeddings", &body).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn upstream_error_bodies_use_the_error_envelope() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_error(&upstream, 429).await;
    hub.insert_channel(openai_draft("limited", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 429);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "upstream_error");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn health_counts_completed_requests() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(&upstream, "ok", None).await;
    hub.insert_channel(openai_draft("primary", &upstream.uri(), &["gpt-4o"]))
        .await;

    hub.post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;

    let response = hub.get("/health").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["total_completed"], 1);
    assert_eq!(body["active_requests"], 0);
}

#[tokio::test]
async fn metrics_expose_relay_counters() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(&upstream, "ok", None).await;
    hub.insert_channel(openai_draft("primary", &upstream.uri(), &["gpt-4o"]))
        .await;

    hub.post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;

    let response = hub.get("/metrics").await;
    let text = response.text().await.expect("metrics text");
    assert!(text.contains("relay_requests_total"));
    assert!(text.contains("relay_in_flight_requests"));
}
