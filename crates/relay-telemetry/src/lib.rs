//! # Relay Telemetry
//!
//! Observability for the LLM Relay Hub.
//!
//! This crate provides:
//! - Prometheus metrics for monitoring
//! - Structured logging setup
//! - Request/response tracking

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod request_tracker;
pub mod tracing_setup;

// Re-export main types
pub use metrics::{RelayMetrics, RequestMetrics};
pub use request_tracker::{RequestInfo, RequestTracker, TrackerStats};
pub use tracing_setup::{init_tracing, TracingConfig, TracingError};
