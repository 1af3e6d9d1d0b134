//! Error taxonomy for the relay hub.
//!
//! Every crate in the workspace reports failures through [`RelayError`]. The
//! variants carry enough data for the server layer to render an
//! OpenAI-compatible error body and for the orchestration loop to decide
//! whether to penalize the channel and whether another attempt is worthwhile.

use std::time::Duration;

use thiserror::Error;

use crate::types::ChannelKind;

/// Convenience alias used across the workspace.
pub type RelayResult<T> = Result<T, RelayError>;

/// Unified error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No enabled ability matches the requested group/model pair.
    #[error("no available channel serves model {model} for group {group}")]
    NoCandidates {
        /// User group the lookup ran for
        group: String,
        /// Public model name the client requested
        model: String,
    },

    /// The selected ability pointed at a channel row that no longer exists.
    #[error("channel {channel_id} disappeared between selection and fetch")]
    ChannelGone {
        /// Identifier of the missing channel
        channel_id: i64,
    },

    /// The client request failed validation before any upstream call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream returned a non-success HTTP status.
    #[error("upstream returned status {status}: {body}")]
    Upstream {
        /// HTTP status code reported by the upstream
        status: u16,
        /// Response body, truncated by the caller where necessary
        body: String,
    },

    /// The upstream could not be reached or the connection broke mid-flight.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No line arrived from the upstream stream within the inactivity window.
    #[error("stream produced no data for {elapsed:?}")]
    StreamIdle {
        /// How long the stream was silent before the relay gave up
        elapsed: Duration,
    },

    /// A batch response body could not be decoded into the canonical shape.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The persistence layer failed.
    #[error("store error: {0}")]
    Store(String),

    /// The hub is misconfigured (unknown channel kind, bad adapter wiring).
    #[error("configuration error: {0}")]
    Config(String),

    /// The channel kind exposes no balance endpoint.
    #[error("balance probing is not supported for {kind} channels")]
    BalanceUnsupported {
        /// Kind of the channel the probe was requested for
        kind: ChannelKind,
    },
}

impl RelayError {
    /// Build a [`RelayError::Transport`] from any displayable error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Build a [`RelayError::Decode`] from any displayable error.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    /// Build a [`RelayError::Store`] from any displayable error.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Build a [`RelayError::Config`] message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`RelayError::InvalidRequest`] message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// HTTP status the server layer should answer with.
    ///
    /// Upstream statuses pass through verbatim so clients see what the
    /// provider actually said; everything else maps onto the conventional
    /// gateway codes.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoCandidates { .. } | Self::ChannelGone { .. } => 503,
            Self::InvalidRequest(_) | Self::BalanceUnsupported { .. } => 400,
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) | Self::Decode(_) => 502,
            Self::StreamIdle { .. } => 504,
            Self::Store(_) | Self::Config(_) => 500,
        }
    }

    /// Machine-readable error code for the OpenAI-style error body.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoCandidates { .. } => "no_available_channel",
            Self::ChannelGone { .. } => "channel_gone",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Upstream { .. } => "upstream_error",
            Self::Transport(_) => "upstream_unreachable",
            Self::StreamIdle { .. } => "stream_idle_timeout",
            Self::Decode(_) => "upstream_decode_error",
            Self::Store(_) => "store_error",
            Self::Config(_) => "configuration_error",
            Self::BalanceUnsupported { .. } => "balance_unsupported",
        }
    }

    /// OpenAI-style `error.type` value.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::BalanceUnsupported { .. } => "invalid_request_error",
            Self::Upstream { .. } => "upstream_error",
            _ => "relay_hub_error",
        }
    }

    /// Whether the orchestration loop may try another channel after this.
    ///
    /// Selection dead ends and client-side validation are final; transport
    /// and upstream failures are worth another draw on the next tier.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChannelGone { .. } | Self::Upstream { .. } | Self::Transport(_) | Self::Decode(_)
        )
    }

    /// Whether this failure should feed the channel penalty ledger.
    ///
    /// Only failures attributable to the selected upstream count; lookup
    /// misses and local errors must not skew future selection.
    #[must_use]
    pub fn penalizes_channel(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::Transport(_) | Self::StreamIdle { .. } | Self::Decode(_)
        )
    }
}
