//! Prometheus metrics for the relay hub.
//!
//! All metrics live in an explicit [`Registry`] owned by [`RelayMetrics`],
//! so tests never fight over global registration and the server can expose
//! exactly one registry per process.

use std::time::Duration;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use relay_core::{RelayMode, Usage};

/// Per-request measurements recorded once the relay settles.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Relay mode
    pub mode: RelayMode,
    /// Public model name
    pub model: String,
    /// Kind of the channel that served (or last failed) the request
    pub channel_kind: String,
    /// Wall time from request arrival to final response or stream end
    pub latency: Duration,
    /// Status code returned to the client
    pub status_code: u16,
    /// Whether the response was streamed
    pub streaming: bool,
    /// Token usage, when the upstream reported it
    pub usage: Option<Usage>,
}

/// Metrics collector for the relay hub.
pub struct RelayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    attempts_total: IntCounterVec,
    request_latency: HistogramVec,
    first_byte_latency: HistogramVec,
    tokens_total: IntCounterVec,
    in_flight: IntGauge,
}

impl RelayMetrics {
    /// Create the collector and register every metric.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("relay_requests_total", "Relay requests by mode and outcome"),
            &["mode", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let attempts_total = IntCounterVec::new(
            Opts::new(
                "relay_attempts_total",
                "Upstream attempts by channel kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "relay_request_duration_seconds",
                "End-to-end request latency by channel kind and mode",
            )
            .buckets(prometheus::exponential_buckets(0.05, 2.0, 12)?),
            &["kind", "mode"],
        )?;
        registry.register(Box::new(request_latency.clone()))?;

        let first_byte_latency = HistogramVec::new(
            HistogramOpts::new(
                "relay_stream_first_byte_seconds",
                "Time to the first streamed line by channel kind",
            )
            .buckets(prometheus::exponential_buckets(0.01, 2.0, 12)?),
            &["kind"],
        )?;
        registry.register(Box::new(first_byte_latency.clone()))?;

        let tokens_total = IntCounterVec::new(
            Opts::new("relay_tokens_total", "Billed tokens by model and direction"),
            &["model", "direction"],
        )?;
        registry.register(Box::new(tokens_total.clone()))?;

        let in_flight = IntGauge::new("relay_in_flight_requests", "Requests currently in flight")?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            attempts_total,
            request_latency,
            first_byte_latency,
            tokens_total,
            in_flight,
        })
    }

    /// Record a settled request.
    pub fn record_request(&self, metrics: &RequestMetrics) {
        let outcome = if metrics.status_code < 400 {
            "ok".to_string()
        } else {
            metrics.status_code.to_string()
        };
        self.requests_total
            .with_label_values(&[metrics.mode.as_str(), &outcome])
            .inc();
        self.request_latency
            .with_label_values(&[&metrics.channel_kind, metrics.mode.as_str()])
            .observe(metrics.latency.as_secs_f64());

        if let Some(usage) = &metrics.usage {
            self.tokens_total
                .with_label_values(&[&metrics.model, "prompt"])
                .inc_by(usage.prompt_tokens.max(0) as u64);
            self.tokens_total
                .with_label_values(&[&metrics.model, "completion"])
                .inc_by(usage.completion_tokens.max(0) as u64);
        }
    }

    /// Record one upstream attempt.
    pub fn record_attempt(&self, kind: &str, outcome: &str) {
        self.attempts_total.with_label_values(&[kind, outcome]).inc();
    }

    /// Record the time to the first streamed line.
    pub fn record_first_byte(&self, kind: &str, latency: Duration) {
        self.first_byte_latency
            .with_label_values(&[kind])
            .observe(latency.as_secs_f64());
    }

    /// A request entered the relay.
    pub fn inc_in_flight(&self) {
        self.in_flight.inc();
    }

    /// A request left the relay.
    pub fn dec_in_flight(&self) {
        self.in_flight.dec();
    }

    /// Render every registered metric in the Prometheus text format.
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}
