//! Channel kinds, relay modes, and the per-attempt relay context.

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Upstream provider family a channel speaks.
///
/// The kind picks the adapter: endpoint layout, header conventions, and
/// stream dialect all follow from it. Stored as lowercase text in the
/// channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// OpenAI and OpenAI-compatible endpoints
    OpenAi,
    /// DeepSeek (OpenAI-shaped wire format with cache-hit billing)
    DeepSeek,
    /// Alibaba DashScope (Qwen family)
    DashScope,
}

impl ChannelKind {
    /// Stable lowercase name used in storage, config, and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::DashScope => "dashscope",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            "dashscope" => Ok(Self::DashScope),
            other => Err(RelayError::config(format!("unknown channel kind: {other}"))),
        }
    }
}

/// What the hub is relaying on behalf of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayMode {
    /// `/v1/chat/completions`
    ChatCompletions,
    /// `/v1/embeddings`
    Embeddings,
}

impl RelayMode {
    /// Stable name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat_completions",
            Self::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an adapter needs to execute one relay attempt.
///
/// Built by the orchestration loop after channel selection; adapters must
/// not reach back into the store. `upstream_model` already has the
/// channel's model mapping applied, so adapters substitute it blindly.
#[derive(Debug, Clone)]
pub struct RelayContext {
    /// Request identifier, echoed in logs and response headers
    pub request_id: String,
    /// Operation being relayed
    pub mode: RelayMode,
    /// User group the request was resolved under
    pub group: String,
    /// Model name as the client requested it
    pub public_model: String,
    /// Model name the upstream expects (mapping applied)
    pub upstream_model: String,
    /// Identifier of the selected channel
    pub channel_id: i64,
    /// Provider family of the selected channel
    pub channel_kind: ChannelKind,
    /// Base URL of the upstream, without a trailing slash
    pub base_url: String,
    /// Upstream credential; never logged, redacted in Debug output
    pub api_key: SecretString,
    /// Whether the client asked for a streaming response
    pub stream: bool,
    /// Discount applied to cached prompt tokens when billing usage
    pub cache_discount: f64,
}
