//! # Relay Server
//!
//! The HTTP surface of the LLM Relay Hub: OpenAI-compatible relay
//! endpoints, the channel administration API, health and metrics, and
//! graceful shutdown coordination. The orchestration loop in [`relay`]
//! ties channel selection, penalties, and the upstream client together;
//! everything else is translation between HTTP and the inner crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod relay;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod stream_session;

pub use error::ApiError;
pub use routes::create_router;
pub use shutdown::{spawn_signal_listener, ShutdownCoordinator, ShutdownPhase};
pub use state::AppState;
