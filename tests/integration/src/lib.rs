//! End-to-end tests for the LLM Relay Hub.
//!
//! Each suite runs the real router (and for streaming, a real listening
//! server) against `wiremock` upstreams, exercising channel selection,
//! failover, stream normalization, and the admin surface the way a
//! deployment would.

pub mod helpers;
pub mod mock_upstreams;

pub use helpers::*;
pub use mock_upstreams::*;

#[cfg(test)]
mod admin_tests;
#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod routing_tests;
#[cfg(test)]
mod streaming_tests;
