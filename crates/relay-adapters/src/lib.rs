//! Provider adapters for the LLM Relay Hub.
//!
//! Each upstream family implements [`RelayAdapter`]: a set of pure
//! transforms between the hub's OpenAI-shaped surface and the provider's
//! native wire format. The shared [`UpstreamClient`] owns the HTTP
//! plumbing, and [`stream`] normalizes provider SSE streams into the
//! hub's incremental chunk protocol.
//!
//! Adapters are selected per channel kind through the [`AdapterRegistry`];
//! provider families can be compiled out via cargo features.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
pub mod balance;
pub mod stream;

#[cfg(feature = "dashscope")]
mod dashscope;
#[cfg(feature = "deepseek")]
mod deepseek;
#[cfg(feature = "openai")]
mod openai;

pub use adapter::{AdapterRegistry, ClientSettings, RelayAdapter, StreamState, UpstreamClient};
pub use balance::{BalanceReport, BalanceSweeper, ExchangeRate, SweepOutcome};
pub use stream::{StreamHandle, StreamPhase, StreamSummary};

#[cfg(feature = "dashscope")]
pub use dashscope::DashScopeAdapter;
#[cfg(feature = "deepseek")]
pub use deepseek::DeepSeekAdapter;
#[cfg(feature = "openai")]
pub use openai::OpenAiAdapter;
