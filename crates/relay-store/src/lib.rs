//! # Relay Store
//!
//! Channel and ability persistence for the LLM Relay Hub.
//!
//! A **channel** is one upstream account: provider kind, base URL,
//! credential, served models, user groups, and routing knobs. An
//! **ability** is the denormalized routing row derived from a channel:
//! one `(group, model, channel)` tuple per group/model combination the
//! channel can serve. Selection only ever reads abilities; channel rows
//! are fetched once a winner is drawn.
//!
//! Two [`RelayStore`] implementations exist: [`SqliteStore`] for real
//! deployments and [`MemoryStore`] for tests and embedded use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ability;
pub mod channel;
pub mod index;
pub mod memory;
mod schema;
pub mod sqlite;
pub mod store;

pub use ability::{expand_abilities, Ability};
pub use channel::{Channel, ChannelDraft, ChannelStatus};
pub use index::AbilityIndex;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{FixReport, RelayStore};
