//! Channel administration handlers.
//!
//! CRUD over channels (each mutation keeps the ability rows in sync via
//! the store), status flips, on-demand balance probes, and the ability
//! maintenance operations. Responses expose everything about a channel
//! except its credential.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use relay_core::ChannelKind;
use relay_store::{Channel, ChannelDraft, ChannelStatus};

use crate::error::ApiError;
use crate::extractors::JsonBody;
use crate::state::AppState;

/// A channel as the admin API reports it. The API key never leaves the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelView {
    /// Row identifier
    pub id: i64,
    /// Operator-facing label
    pub name: String,
    /// Provider family
    pub kind: ChannelKind,
    /// Upstream base URL
    pub base_url: String,
    /// Public model names this channel serves
    pub models: Vec<String>,
    /// User groups allowed to use this channel
    pub groups: Vec<String>,
    /// Public name to upstream name mapping
    pub model_mapping: std::collections::HashMap<String, String>,
    /// Selection tier
    pub priority: i64,
    /// Share within the tier
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

impl From<Channel> for ChannelView {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            kind: channel.kind,
            base_url: channel.base_url,
            models: channel.models,
            groups: channel.groups,
            model_mapping: channel.model_mapping,
            priority: channel.priority,
            weight: channel.weight,
            status: channel.status,
            tag: channel.tag,
            balance: channel.balance,
            balance_updated_at: channel.balance_updated_at,
            created_at: channel.created_at,
        }
    }
}

/// Body of `POST /admin/channels/:id/status`.
#[derive(Debug, Deserialize)]
pub struct StatusBody {
    /// Status to apply
    pub status: ChannelStatus,
}

/// Body of `POST /admin/abilities/tag`.
#[derive(Debug, Deserialize)]
pub struct TagBody {
    /// Tag selecting the ability rows and channels to retune
    pub tag: String,
    /// New selection tier, when given
    #[serde(default)]
    pub priority: Option<i64>,
    /// New weight, when given
    #[serde(default)]
    pub weight: Option<i64>,
}

/// `GET /admin/channels`
pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<ChannelView>>, ApiError> {
    let channels = state.store.list_channels().await?;
    Ok(Json(channels.into_iter().map(ChannelView::from).collect()))
}

/// `POST /admin/channels`
pub async fn create_channel(
    State(state): State<AppState>,
    JsonBody(draft): JsonBody<ChannelDraft>,
) -> Result<Response, ApiError> {
    draft.validate()?;
    let channel = state.store.insert_channel(draft).await?;
    info!(channel_id = channel.id, name = %channel.name, "channel created");
    Ok((StatusCode::CREATED, Json(ChannelView::from(channel))).into_response())
}

/// `GET /admin/channels/:id`
pub async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChannelView>, ApiError> {
    let channel = state
        .store
        .get_channel(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no channel with id {id}")))?;
    Ok(Json(ChannelView::from(channel)))
}

/// `PUT /admin/channels/:id`
pub async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(draft): JsonBody<ChannelDraft>,
) -> Result<Json<ChannelView>, ApiError> {
    draft.validate()?;
    let channel = state.store.update_channel(id, draft).await?;
    info!(channel_id = id, name = %channel.name, "channel updated");
    Ok(Json(ChannelView::from(channel)))
}

/// `DELETE /admin/channels/:id`
pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_channel(id).await? {
        info!(channel_id = id, "channel deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no channel with id {id}")))
    }
}

/// `POST /admin/channels/:id/status`
pub async fn set_channel_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<ChannelView>, ApiError> {
    if !state.store.set_channel_status(id, body.status).await? {
        return Err(ApiError::not_found(format!("no channel with id {id}")));
    }
    info!(channel_id = id, status = ?body.status, "channel status changed");
    let channel = state
        .store
        .get_channel(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no channel with id {id}")))?;
    Ok(Json(ChannelView::from(channel)))
}

/// `POST /admin/channels/:id/balance` — probe one channel now.
pub async fn probe_channel_balance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<relay_adapters::BalanceReport>, ApiError> {
    let report = state.sweeper.update_channel_balance(id).await?;
    Ok(Json(report))
}

/// `POST /admin/channels/balance` — probe every enabled channel now.
pub async fn sweep_balances(
    State(state): State<AppState>,
) -> Result<Json<relay_adapters::SweepOutcome>, ApiError> {
    let outcome = state.sweeper.sweep().await?;
    Ok(Json(outcome))
}

/// `POST /admin/abilities/fix`
pub async fn fix_abilities(
    State(state): State<AppState>,
) -> Result<Json<relay_store::FixReport>, ApiError> {
    let report = state.store.fix_abilities().await?;
    info!(
        removed_orphans = report.removed_orphans,
        rebuilt_channels = report.rebuilt_channels,
        "ability repair finished"
    );
    Ok(Json(report))
}

/// `POST /admin/abilities/tag`
pub async fn retune_by_tag(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<TagBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.tag.trim().is_empty() {
        return Err(ApiError::bad_request("tag is required"));
    }
    if body.priority.is_none() && body.weight.is_none() {
        return Err(ApiError::bad_request(
            "at least one of priority or weight is required",
        ));
    }
    let touched = state
        .store
        .update_abilities_by_tag(&body.tag, body.priority, body.weight)
        .await?;
    info!(tag = %body.tag, touched, "abilities retuned by tag");
    Ok(Json(serde_json::json!({ "touched": touched })))
}
