//! Admin surface: channel lifecycle, balance probes, ability maintenance.

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::ChannelKind;
use relay_store::ChannelDraft;

use crate::helpers::{chat_body, openai_draft, TestHub};
use crate::mock_upstreams::mount_chat_ok;

fn deepseek_draft(name: &str, base_url: &str) -> ChannelDraft {
    ChannelDraft {
        name: name.to_string(),
        kind: ChannelKind::DeepSeek,
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: format!("sk-{name}"),
        models: vec!["deepseek-chat".to_string()],
        groups: vec!["default".to_string()],
        model_mapping: HashMap::new(),
        priority: 0,
        weight: 1,
        tag: None,
    }
}

async fn mount_deepseek_balance(server: &MockServer, usd: &str) {
    Mock::given(method("GET"))
        .and(path("/user/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_available": true,
            "balance_infos": [{"currency": "USD", "total_balance": usd}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn disabling_a_channel_removes_it_from_selection() {
    let hub = TestHub::start().await;
    let upstream = MockServer::start().await;
    mount_chat_ok(&upstream, "ok", None).await;
    let channel = hub
        .insert_channel(openai_draft("primary", &upstream.uri(), &["gpt-4o"]))
        .await;

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = hub
        .post_json(
            &format!("/admin/channels/{}/status", channel.id),
            &json!({"status": "manually_disabled"}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["status"], "manually_disabled");

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 503);

    // Re-enabling restores service.
    hub.post_json(
        &format!("/admin/channels/{}/status", channel.id),
        &json!({"status": "enabled"}),
    )
    .await;
    let response = hub
        .post_json("/v1/chat/completions", &chat_body("gpt-4o"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn updating_a_channel_rebuilds_its_abilities() {
    let hub = TestHub::start().await;
    let channel = hub
        .insert_channel(openai_draft("primary", "https://api.openai.com", &["old-model"]))
        .await;

    let response = hub.get("/v1/models").await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"][0]["id"], "old-model");

    let draft = json!({
        "name": "primary",
        "kind": "openai",
        "base_url": "https://api.openai.com",
        "api_key": "sk-primary",
        "models": ["new-model"],
        "groups": ["default"],
        "priority": 0,
        "weight": 1
    });
    let response = hub
        .client
        .put(hub.url(&format!("/admin/channels/{}", channel.id)))
        .json(&draft)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 200);

    let response = hub.get("/v1/models").await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"][0]["id"], "new-model");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn deleting_a_channel_removes_its_models() {
    let hub = TestHub::start().await;
    let channel = hub
        .insert_channel(openai_draft("doomed", "https://api.openai.com", &["gpt-4o"]))
        .await;

    let response = hub
        .client
        .delete(hub.url(&format!("/admin/channels/{}", channel.id)))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 204);

    let response = hub.get("/v1/models").await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn balance_probe_reports_and_keeps_a_funded_channel() {
    let hub = TestHub::start().await;
    let billing = MockServer::start().await;
    mount_deepseek_balance(&billing, "42.50").await;
    let channel = hub.insert_channel(deepseek_draft("funded", &billing.uri())).await;

    let response = hub
        .post_json(&format!("/admin/channels/{}/balance", channel.id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["balance"], 42.5);
    assert_eq!(body["disabled"], false);

    let response = hub.get(&format!("/admin/channels/{}", channel.id)).await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["balance"], 42.5);
    assert_eq!(body["status"], "enabled");
    assert!(body["balance_updated_at"].is_string());
}

#[tokio::test]
async fn exhausted_balance_auto_disables_and_stops_relays() {
    let hub = TestHub::start().await;
    let billing = MockServer::start().await;
    mount_deepseek_balance(&billing, "0.00").await;
    let channel = hub.insert_channel(deepseek_draft("dry", &billing.uri())).await;

    let response = hub
        .post_json(&format!("/admin/channels/{}/balance", channel.id), &json!({}))
        .await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["disabled"], true);

    let response = hub.get(&format!("/admin/channels/{}", channel.id)).await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["status"], "auto_disabled");

    let response = hub
        .post_json("/v1/chat/completions", &chat_body("deepseek-chat"))
        .await;
    assert_eq!(response.status().as_u16(), 503);
}

#[tokio::test]
async fn sweep_tallies_probed_and_skipped_channels() {
    let hub = TestHub::start().await;
    let billing = MockServer::start().await;
    mount_deepseek_balance(&billing, "9.00").await;
    hub.insert_channel(deepseek_draft("funded", &billing.uri())).await;

    // DashScope has no billing surface, so a sweep skips it.
    let mut dashscope = deepseek_draft("ali", &billing.uri());
    dashscope.kind = ChannelKind::DashScope;
    dashscope.base_url = "https://dashscope.aliyuncs.com".to_string();
    hub.insert_channel(dashscope).await;

    let response = hub.post_json("/admin/channels/balance", &json!({})).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["probed"], 1);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["disabled"], 0);
}

#[tokio::test]
async fn ability_fix_reports_rebuilt_channels() {
    let hub = TestHub::start().await;
    hub.insert_channel(openai_draft("a", "https://api.openai.com", &["m1"]))
        .await;
    hub.insert_channel(openai_draft("b", "https://api.openai.com", &["m2"]))
        .await;

    let response = hub.post_json("/admin/abilities/fix", &json!({})).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["removed_orphans"], 0);
    assert_eq!(body["rebuilt_channels"], 2);

    // The rebuild is idempotent over a consistent store.
    let response = hub.get("/v1/models").await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn tag_retune_touches_every_tagged_channel() {
    let hub = TestHub::start().await;
    let mut draft = openai_draft("cheap-1", "https://api.openai.com", &["m1"]);
    draft.tag = Some("cheap".to_string());
    let first = hub.insert_channel(draft).await;
    let mut draft = openai_draft("cheap-2", "https://api.openai.com", &["m2"]);
    draft.tag = Some("cheap".to_string());
    hub.insert_channel(draft).await;
    let untagged = hub
        .insert_channel(openai_draft("other", "https://api.openai.com", &["m3"]))
        .await;

    let response = hub
        .post_json(
            "/admin/abilities/tag",
            &json!({"tag": "cheap", "priority": 7, "weight": 3}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["touched"], 2);

    let response = hub.get(&format!("/admin/channels/{}", first.id)).await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["priority"], 7);
    assert_eq!(body["weight"], 3);

    let response = hub.get(&format!("/admin/channels/{}", untagged.id)).await;
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["priority"], 0);
    assert_eq!(body["weight"], 1);
}
