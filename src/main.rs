//! # LLM Relay Hub
//!
//! OpenAI-compatible relay hub over multiple upstream LLM providers with
//! adaptive channel selection and stream normalization.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (sqlite://relay-hub.db, port 3000)
//! llm-relay-hub
//!
//! # Start with a config file
//! llm-relay-hub config.yaml
//!
//! # Environment overrides
//! RELAY_HUB_PORT=9000 llm-relay-hub
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use relay_adapters::{AdapterRegistry, BalanceSweeper, ClientSettings, ExchangeRate, UpstreamClient};
use relay_config::{HubConfig, LogFormat};
use relay_routing::{ChannelSelector, PenaltyConfig, PenaltyLedger};
use relay_server::{create_router, spawn_signal_listener, AppState, ShutdownCoordinator};
use relay_store::{RelayStore, SqliteStore};
use relay_telemetry::{init_tracing, RelayMetrics, RequestTracker, TracingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => HubConfig::load(&path).with_context(|| format!("loading config {path}"))?,
        None => HubConfig::from_env().context("loading config from environment")?,
    };

    init_tracing(
        &TracingConfig::new()
            .with_log_level(&config.telemetry.log_level)
            .with_json(config.telemetry.log_format == LogFormat::Json),
    )
    .context("initializing tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        store = %config.store.url,
        "starting llm-relay-hub"
    );

    run(config).await
}

async fn run(config: HubConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let coordinator = Arc::new(ShutdownCoordinator::new());

    // Storage; the schema is applied on connect.
    let store: Arc<dyn RelayStore> = Arc::new(
        SqliteStore::connect(&config.store.url, config.store.max_connections)
            .await
            .context("opening channel store")?,
    );

    // Selection: penalty ledger plus the weighted selector over it.
    let ledger = Arc::new(PenaltyLedger::new(PenaltyConfig {
        base_penalty: config.routing.penalty.base_penalty,
        recovery: config.routing.penalty.recovery,
        max_record_age: config.routing.penalty.max_record_age,
        cleanup_interval: config.routing.penalty.cleanup_interval,
    }));
    coordinator.register_task(ledger.spawn_cleanup()).await;
    let selector = Arc::new(ChannelSelector::new(store.clone(), ledger));

    // Upstream side: adapters behind one shared HTTP client.
    let client = UpstreamClient::new(
        Arc::new(AdapterRegistry::new()),
        ClientSettings::default()
            .with_connect_timeout(config.relay.connect_timeout)
            .with_upstream_timeout(config.relay.upstream_timeout)
            .with_stream_idle_timeout(config.relay.stream_idle_timeout)
            .with_stream_buffer(config.relay.stream_buffer),
    )
    .context("building upstream client")?;

    // Balance probing and the exchange rate behind it.
    let api_key = if config.balance.exchange_rate_api_key.is_empty() {
        None
    } else {
        Some(config.balance.exchange_rate_api_key.clone().into())
    };
    let rate = Arc::new(
        ExchangeRate::new(config.balance.usd_cny_rate, api_key)
            .context("building exchange rate source")?,
    );
    if config.balance.exchange_rate_api_key.is_empty() {
        info!(
            rate = config.balance.usd_cny_rate,
            "no exchange rate api key, using the configured rate"
        );
    } else {
        coordinator
            .register_task(rate.spawn_refresh(config.balance.refresh_interval))
            .await;
    }
    let sweeper = Arc::new(
        BalanceSweeper::new(store.clone(), rate, config.balance.probe_pause)
            .context("building balance sweeper")?,
    );
    if config.balance.sweep_interval.is_zero() {
        info!("balance sweeping disabled");
    } else {
        coordinator
            .register_task(sweeper.spawn_sweep(config.balance.sweep_interval))
            .await;
    }

    let metrics = Arc::new(RelayMetrics::new().context("registering metrics")?);
    let tracker = Arc::new(RequestTracker::new());

    let state = AppState::new(
        config.clone(),
        store,
        selector,
        client,
        sweeper,
        metrics,
        tracker.clone(),
    );
    let app = create_router(state);

    spawn_signal_listener(coordinator.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.signal())
        .await
        .context("serving")?;

    // The listener is closed; wait out in-flight work and stop the tasks.
    let grace = config.server.shutdown_grace.max(Duration::from_secs(1));
    coordinator.drain(&tracker, grace).await;

    if tracker.stats().active_requests > 0 {
        warn!("exiting with requests still in flight");
    }
    Ok(())
}
