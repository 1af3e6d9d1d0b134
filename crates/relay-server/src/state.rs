//! Shared application state.

use std::sync::Arc;

use relay_adapters::{BalanceSweeper, UpstreamClient};
use relay_config::HubConfig;
use relay_routing::ChannelSelector;
use relay_store::RelayStore;
use relay_telemetry::{RelayMetrics, RequestTracker};

/// Everything the handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    /// Hub configuration
    pub config: Arc<HubConfig>,
    /// Channel and ability persistence
    pub store: Arc<dyn RelayStore>,
    /// Penalty-aware channel selection
    pub selector: Arc<ChannelSelector>,
    /// Shared upstream HTTP front door
    pub client: UpstreamClient,
    /// Balance probing
    pub sweeper: Arc<BalanceSweeper>,
    /// Prometheus collector
    pub metrics: Arc<RelayMetrics>,
    /// In-flight request tracking
    pub tracker: Arc<RequestTracker>,
}

impl AppState {
    /// Assemble the state from its already-built parts.
    #[must_use]
    pub fn new(
        config: Arc<HubConfig>,
        store: Arc<dyn RelayStore>,
        selector: Arc<ChannelSelector>,
        client: UpstreamClient,
        sweeper: Arc<BalanceSweeper>,
        metrics: Arc<RelayMetrics>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            config,
            store,
            selector,
            client,
            sweeper,
            metrics,
            tracker,
        }
    }
}
