//! Structured logging setup.
//!
//! The hub logs through `tracing`; this module wires the subscriber with an
//! env-filter and either a human-readable or a JSON formatter.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switch to JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Tracing initialization error
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to initialize tracing
    #[error("failed to initialize tracing: {0}")]
    Init(String),
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_filter(filter))
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_filter(filter))
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;
    }

    info!(
        level = %config.log_level,
        json = config.json,
        "Tracing initialized"
    );
    Ok(())
}
