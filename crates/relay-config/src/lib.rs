//! # Relay Config
//!
//! Configuration management for the LLM Relay Hub.
//!
//! Configuration is read from a YAML file, then a small set of environment
//! variables (`RELAY_HUB_*`) override individual fields so deployments can
//! tweak hosts, credentials, and log output without editing the file.
//! Validation runs after layering and reports every problem at once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid YAML for the expected shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// One or more fields failed validation.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Top-level configuration for the relay hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Persistence settings
    pub store: StoreConfig,
    /// Channel selection settings
    pub routing: RoutingConfig,
    /// Upstream relay settings
    pub relay: RelaySettings,
    /// Balance probing settings
    pub balance: BalanceConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Grace period for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite connection URL, e.g. `sqlite://relay-hub.db?mode=rwc`
    pub url: String,
    /// Connection pool size
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://relay-hub.db?mode=rwc".to_string(),
            max_connections: 8,
        }
    }
}

/// Channel selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Maximum relay attempts per request (first try included)
    pub max_retries: u32,
    /// Penalty ledger tuning
    pub penalty: PenaltySettings,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            penalty: PenaltySettings::default(),
        }
    }
}

/// Penalty ledger tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltySettings {
    /// Penalty added per failure, scaled by the consecutive failure count
    pub base_penalty: i64,
    /// Window over which a penalty decays back to zero
    #[serde(with = "humantime_serde")]
    pub recovery: Duration,
    /// Age after which an untouched record is dropped
    #[serde(with = "humantime_serde")]
    pub max_record_age: Duration,
    /// How often the cleanup task runs
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for PenaltySettings {
    fn default() -> Self {
        Self {
            base_penalty: 2,
            recovery: Duration::from_secs(600),
            max_record_age: Duration::from_secs(1800),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

/// Upstream relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Abort a stream after this long without an upstream line
    #[serde(with = "humantime_serde")]
    pub stream_idle_timeout: Duration,
    /// Capacity of the producer/consumer chunk channel
    pub stream_buffer: usize,
    /// Discount applied to cached prompt tokens
    pub cache_discount: f64,
    /// TCP connect timeout for upstream calls
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Overall deadline for batch upstream calls
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            stream_idle_timeout: Duration::from_secs(60),
            stream_buffer: 16,
            cache_discount: 0.85,
            connect_timeout: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(300),
        }
    }
}

/// Balance probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Interval between balance sweeps; zero disables the sweep task
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Pause between channels within one sweep
    #[serde(with = "humantime_serde")]
    pub probe_pause: Duration,
    /// Fallback USD/CNY rate used when no live rate is available
    pub usd_cny_rate: f64,
    /// api-ninjas key for live exchange rates; empty disables refresh
    pub exchange_rate_api_key: String,
    /// How often to refresh the live exchange rate
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::ZERO,
            probe_pause: Duration::from_millis(500),
            usd_cny_rate: 7.3,
            exchange_rate_api_key: String::new(),
            refresh_interval: Duration::from_secs(6 * 3600),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `text` or `json`
    pub log_format: LogFormat,
    /// Default tracing filter, overridable via `RUST_LOG`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    Text,
    /// Structured JSON output
    Json,
}

impl HubConfig {
    /// Load from a YAML file, apply env overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults layered with env overrides; used when no file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RELAY_HUB_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_HUB_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("RELAY_HUB_STORE_URL") {
            self.store.url = url;
        }
        if let Ok(level) = std::env::var("RELAY_HUB_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }
        if let Ok(format) = std::env::var("RELAY_HUB_LOG_FORMAT") {
            match format.as_str() {
                "json" => self.telemetry.log_format = LogFormat::Json,
                "text" => self.telemetry.log_format = LogFormat::Text,
                _ => {}
            }
        }
        if let Ok(key) = std::env::var("RELAY_HUB_EXCHANGE_API_KEY") {
            self.balance.exchange_rate_api_key = key;
        }
    }

    /// Validate cross-field constraints, collecting every violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if !self.store.url.starts_with("sqlite:") {
            problems.push(format!(
                "store.url must be a sqlite URL, got {}",
                self.store.url
            ));
        }
        if self.store.max_connections == 0 {
            problems.push("store.max_connections must be at least 1".to_string());
        }
        if self.routing.max_retries == 0 {
            problems.push("routing.max_retries must be at least 1".to_string());
        }
        if self.routing.penalty.base_penalty < 0 {
            problems.push("routing.penalty.base_penalty must not be negative".to_string());
        }
        if self.routing.penalty.recovery.is_zero() {
            problems.push("routing.penalty.recovery must not be zero".to_string());
        }
        if self.relay.stream_buffer == 0 {
            problems.push("relay.stream_buffer must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.relay.cache_discount) {
            problems.push(format!(
                "relay.cache_discount must be within [0.0, 1.0], got {}",
                self.relay.cache_discount
            ));
        }
        if self.relay.stream_idle_timeout.is_zero() {
            problems.push("relay.stream_idle_timeout must not be zero".to_string());
        }
        if self.balance.usd_cny_rate <= 0.0 {
            problems.push(format!(
                "balance.usd_cny_rate must be positive, got {}",
                self.balance.usd_cny_rate
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}
