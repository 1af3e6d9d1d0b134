//! Channel model and admin drafts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use relay_core::{ChannelKind, RelayError};

/// Lifecycle status of a channel.
///
/// Only [`Enabled`](Self::Enabled) channels keep their abilities on; both
/// disabled states take the channel out of selection without deleting its
/// configuration. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// In rotation
    Enabled,
    /// Taken out by an operator
    ManuallyDisabled,
    /// Taken out by the hub (exhausted balance, hard upstream errors)
    AutoDisabled,
}

impl ChannelStatus {
    /// Integer form used in the database.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Enabled => 1,
            Self::ManuallyDisabled => 2,
            Self::AutoDisabled => 3,
        }
    }

    /// Parse the integer form; unknown values are treated as data corruption.
    pub fn from_i64(value: i64) -> Result<Self, RelayError> {
        match value {
            1 => Ok(Self::Enabled),
            2 => Ok(Self::ManuallyDisabled),
            3 => Ok(Self::AutoDisabled),
            other => Err(RelayError::store(format!("unknown channel status: {other}"))),
        }
    }

    /// Whether abilities derived from this channel are selectable.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// One configured upstream account.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Row identifier
    pub id: i64,
    /// Operator-facing label
    pub name: String,
    /// Provider family; picks the adapter
    pub kind: ChannelKind,
    /// Upstream base URL without a trailing slash
    pub base_url: String,
    /// Upstream credential; redacted in Debug output
    pub api_key: SecretString,
    /// Public model names this channel serves
    pub models: Vec<String>,
    /// User groups allowed to use this channel
    pub groups: Vec<String>,
    /// Public name to upstream name mapping
    pub model_mapping: HashMap<String, String>,
    /// Selection tier; higher tiers are tried first
    pub priority: i64,
    /// Share within a tier
    pub weight: i64,
    /// Lifecycle status
    pub status: ChannelStatus,
    /// Optional label for batch retuning
    pub tag: Option<String>,
    /// Last probed balance in USD
    pub balance: f64,
    /// When the balance was last probed
    pub balance_updated_at: Option<DateTime<Utc>>,
    /// When the channel was created
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Upstream model name for a public model, with the mapping applied.
    #[must_use]
    pub fn upstream_model(&self, public_model: &str) -> String {
        self.model_mapping
            .get(public_model)
            .cloned()
            .unwrap_or_else(|| public_model.to_string())
    }

    /// Public model names that get ability rows: the served models plus
    /// every mapping alias not already listed, aliases sorted for
    /// deterministic row order.
    #[must_use]
    pub fn ability_models(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.models.len() + self.model_mapping.len());
        for model in &self.models {
            if seen.insert(model.clone()) {
                out.push(model.clone());
            }
        }
        let mut aliases: Vec<_> = self
            .model_mapping
            .keys()
            .filter(|alias| !seen.contains(*alias))
            .cloned()
            .collect();
        aliases.sort();
        out.extend(aliases);
        out
    }
}

/// Payload for creating or replacing a channel's configuration.
///
/// Balance and timestamps are owned by the hub and cannot be set here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDraft {
    /// Operator-facing label
    pub name: String,
    /// Provider family
    pub kind: ChannelKind,
    /// Upstream base URL
    pub base_url: String,
    /// Upstream credential
    pub api_key: String,
    /// Public model names this channel serves
    pub models: Vec<String>,
    /// User groups; defaults to `["default"]`
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    /// Public name to upstream name mapping
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Selection tier
    #[serde(default)]
    pub priority: i64,
    /// Share within the tier
    #[serde(default)]
    pub weight: i64,
    /// Optional label for batch retuning
    #[serde(default)]
    pub tag: Option<String>,
}

fn default_groups() -> Vec<String> {
    vec!["default".to_string()]
}

impl ChannelDraft {
    /// Validate before any write.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.trim().is_empty() {
            return Err(RelayError::invalid("channel name is required"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RelayError::invalid(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if self.models.is_empty() {
            return Err(RelayError::invalid("channel must serve at least one model"));
        }
        if self.groups.is_empty() {
            return Err(RelayError::invalid("channel must belong to at least one group"));
        }
        if self.weight < 0 {
            return Err(RelayError::invalid("weight must not be negative"));
        }
        Ok(())
    }

    /// Base URL with any trailing slash stripped.
    #[must_use]
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}
