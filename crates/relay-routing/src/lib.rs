//! # Relay Routing
//!
//! Adaptive channel selection for the LLM Relay Hub.
//!
//! This crate provides:
//! - A per-channel penalty ledger with linear decay
//! - Weighted random selection discounted by live penalties
//! - Priority tier walk-down across retries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod penalty;
pub mod selector;

pub use penalty::{PenaltyConfig, PenaltyLedger};
pub use selector::{ChannelSelector, SelectedChannel, SMOOTHING};
