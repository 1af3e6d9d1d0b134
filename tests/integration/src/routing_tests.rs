//! Failover, tier walk-down, and penalty behavior through the HTTP surface.

use pretty_assertions::assert_eq;
use serde_json::Value;
use wiremock::MockServer;

use crate::helpers::{chat_body, openai_draft, TestHub};
use crate::mock_upstreams::{mount_chat_error, mount_chat_ok};

#[tokio::test]
async fn failover_walks_down_a_tier_and_penalizes_the_loser() {
    let hub = TestHub::start().await;

    let failing = MockServer::start().await;
    mount_chat_error(&failing, 500).await;
    let mut high = openai_draft("tier-high", &failing.uri(), &["gpt-4o"]);
    high.priority = 10;
    let high = hub.insert_channel(high).await;

    let healthy = MockServer::start().await;
    mount_chat_ok(&healthy, "rescued", None).await;
    let low = hub
        .insert_channel(openai_draft("tier-low", &healthy.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["choices"][0]["message"]["content"], "rescued");

    let ledger = hub.state.selector.ledger();
    assert!(ledger.penalty_weight(high.id, 1000) > 0);
    assert_eq!(ledger.penalty_weight(low.id, 1000), 0);
}

#[tokio::test]
async fn exhausted_candidates_surface_the_last_upstream_status() {
    let hub = TestHub::start().await;
    let failing = MockServer::start().await;
    mount_chat_error(&failing, 503).await;
    let only = hub
        .insert_channel(openai_draft("only", &failing.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    // The channel failed, was excluded, and nothing else serves the
    // model; the caller sees the upstream failure, not a selection miss.
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "upstream_error");

    assert!(hub.state.selector.ledger().penalty_weight(only.id, 1000) > 0);
}

#[tokio::test]
async fn every_failed_channel_in_the_walk_is_penalized() {
    let hub = TestHub::start().await;

    let first = MockServer::start().await;
    mount_chat_error(&first, 500).await;
    let mut draft = openai_draft("broken-high", &first.uri(), &["gpt-4o"]);
    draft.priority = 10;
    let a = hub.insert_channel(draft).await;

    let second = MockServer::start().await;
    mount_chat_error(&second, 502).await;
    let b = hub
        .insert_channel(openai_draft("broken-low", &second.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    // Last attempt hit the low tier, so its status wins.
    assert_eq!(response.status().as_u16(), 502);

    let ledger = hub.state.selector.ledger();
    assert!(ledger.penalty_weight(a.id, 1000) > 0);
    assert!(ledger.penalty_weight(b.id, 1000) > 0);
}

#[tokio::test]
async fn retry_budget_caps_the_walk() {
    let hub = TestHub::start_with(|config| {
        config.routing.max_retries = 1;
    })
    .await;

    let failing = MockServer::start().await;
    mount_chat_error(&failing, 500).await;
    let mut draft = openai_draft("tier-high", &failing.uri(), &["gpt-4o"]);
    draft.priority = 10;
    hub.insert_channel(draft).await;

    let healthy = MockServer::start().await;
    mount_chat_ok(&healthy, "never reached", None).await;
    hub.insert_channel(openai_draft("tier-low", &healthy.uri(), &["gpt-4o"]))
        .await;

    // One attempt only: the high tier fails and there is no second try.
    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 500);
}

#[tokio::test]
async fn unreachable_upstreams_count_as_transport_failures() {
    let hub = TestHub::start().await;
    // Port 9 is the discard port; nothing answers there.
    let dead = hub
        .insert_channel(openai_draft("dead", "http://127.0.0.1:9", &["gpt-4o"]))
        .await;

    let healthy = MockServer::start().await;
    mount_chat_ok(&healthy, "alive", None).await;
    let mut draft = openai_draft("alive", &healthy.uri(), &["gpt-4o"]);
    draft.priority = -10;
    hub.insert_channel(draft).await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(hub.state.selector.ledger().penalty_weight(dead.id, 1000) > 0);
}

#[tokio::test]
async fn unknown_model_is_a_selection_miss() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(&upstream, "ok", None).await;
    hub.insert_channel(openai_draft("primary", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-5-nope"))
        .await;
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "no_available_channel");
}
