//! Test harness: a hub over an in-memory store with real adapters.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use relay_adapters::{
    AdapterRegistry, BalanceSweeper, ClientSettings, ExchangeRate, UpstreamClient,
};
use relay_config::HubConfig;
use relay_core::ChannelKind;
use relay_routing::{ChannelSelector, PenaltyConfig, PenaltyLedger};
use relay_server::{create_router, AppState};
use relay_store::{Channel, ChannelDraft, MemoryStore, RelayStore};
use relay_telemetry::{RelayMetrics, RequestTracker};

static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Opt-in tracing output for test debugging (`TEST_LOG=1`).
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A running hub bound to a local port.
pub struct TestHub {
    /// State shared with the running router
    pub state: AppState,
    /// Base URL of the listening server
    pub base_url: String,
    /// Client for talking to it
    pub client: reqwest::Client,
    addr: SocketAddr,
}

impl TestHub {
    /// Start a hub with default settings.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a hub after tweaking the configuration.
    pub async fn start_with(configure: impl FnOnce(&mut HubConfig)) -> Self {
        init_tracing();
        let mut config = HubConfig::default();
        configure(&mut config);
        let state = build_state(config);
        let app = create_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("test client");

        Self {
            state,
            base_url: format!("http://{addr}"),
            client,
            addr,
        }
    }

    /// Address the hub is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Full URL for a path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Insert a channel straight through the store.
    pub async fn insert_channel(&self, draft: ChannelDraft) -> Channel {
        self.state
            .store
            .insert_channel(draft)
            .await
            .expect("insert channel")
    }

    /// POST a JSON body.
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("request")
    }

    /// GET a path.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request")
    }
}

/// Assemble an [`AppState`] over a fresh in-memory store.
#[must_use]
pub fn build_state(config: HubConfig) -> AppState {
    let store: Arc<dyn RelayStore> = Arc::new(MemoryStore::new());
    let ledger = Arc::new(PenaltyLedger::new(PenaltyConfig {
        base_penalty: config.routing.penalty.base_penalty,
        recovery: config.routing.penalty.recovery,
        max_record_age: config.routing.penalty.max_record_age,
        cleanup_interval: config.routing.penalty.cleanup_interval,
    }));
    let selector = Arc::new(ChannelSelector::new(store.clone(), ledger));
    let client = UpstreamClient::new(
        Arc::new(AdapterRegistry::new()),
        ClientSettings::default()
            .with_connect_timeout(config.relay.connect_timeout)
            .with_upstream_timeout(config.relay.upstream_timeout)
            .with_stream_idle_timeout(config.relay.stream_idle_timeout)
            .with_stream_buffer(config.relay.stream_buffer),
    )
    .expect("upstream client");
    let rate = Arc::new(ExchangeRate::new(config.balance.usd_cny_rate, None).expect("rate"));
    let sweeper = Arc::new(
        BalanceSweeper::new(store.clone(), rate, Duration::ZERO).expect("sweeper"),
    );
    AppState::new(
        Arc::new(config),
        store,
        selector,
        client,
        sweeper,
        Arc::new(RelayMetrics::new().expect("metrics")),
        Arc::new(RequestTracker::new()),
    )
}

/// Draft for an OpenAI-compatible channel pointing at a mock upstream.
#[must_use]
pub fn openai_draft(name: &str, base_url: &str, models: &[&str]) -> ChannelDraft {
    ChannelDraft {
        name: name.to_string(),
        kind: ChannelKind::OpenAi,
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key: format!("sk-{name}"),
        models: models.iter().map(ToString::to_string).collect(),
        groups: vec!["default".to_string()],
        model_mapping: HashMap::new(),
        priority: 0,
        weight: 1,
        tag: None,
    }
}

/// Minimal chat completion body for `model`.
#[must_use]
pub fn chat_body(model: &str) -> Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "hello"}]
    })
}

/// Collect the `data:` payloads of an SSE response, `[DONE]` included.
pub async fn collect_sse(response: reqwest::Response) -> Vec<String> {
    assert!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream")),
        "expected an SSE response"
    );
    let mut body = response.bytes_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk.expect("stream chunk"));
    }
    String::from_utf8(buffer)
        .expect("utf8 stream")
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|payload| payload.trim().to_string())
        .filter(|payload| !payload.is_empty())
        .collect()
}
