//! The persistence seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_core::RelayResult;

use crate::ability::Ability;
use crate::channel::{Channel, ChannelDraft, ChannelStatus};

/// Result of an ability repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    /// Ability rows whose channel no longer existed
    pub removed_orphans: u64,
    /// Channels whose abilities were regenerated
    pub rebuilt_channels: u64,
}

/// Storage operations the hub needs.
///
/// Mutations scoped to one channel (insert, update, delete, status flips)
/// must be atomic: readers never observe a channel with half of its
/// ability rows. Implementations are free to achieve that with database
/// transactions or a single lock.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Create a channel and its ability rows. Returns the stored channel.
    async fn insert_channel(&self, draft: ChannelDraft) -> RelayResult<Channel>;

    /// Fetch one channel by id.
    async fn get_channel(&self, id: i64) -> RelayResult<Option<Channel>>;

    /// All channels, id ascending.
    async fn list_channels(&self) -> RelayResult<Vec<Channel>>;

    /// Replace a channel's configuration and rebuild its ability rows.
    /// Balance and creation time are preserved.
    async fn update_channel(&self, id: i64, draft: ChannelDraft) -> RelayResult<Channel>;

    /// Delete a channel and its ability rows. Returns whether it existed.
    async fn delete_channel(&self, id: i64) -> RelayResult<bool>;

    /// Flip a channel's status and toggle its ability rows in place.
    /// Returns whether the channel existed.
    async fn set_channel_status(&self, id: i64, status: ChannelStatus) -> RelayResult<bool>;

    /// Record a probed balance and its timestamp.
    async fn update_channel_balance(&self, id: i64, balance: f64) -> RelayResult<()>;

    /// Delete and reinsert the ability rows for a channel.
    async fn rebuild_abilities(&self, channel: &Channel) -> RelayResult<()>;

    /// Delete all ability rows of a channel. Returns the removed count.
    async fn delete_abilities(&self, channel_id: i64) -> RelayResult<u64>;

    /// Toggle all ability rows of a channel. Returns the touched count.
    async fn set_abilities_enabled(&self, channel_id: i64, enabled: bool) -> RelayResult<u64>;

    /// Retune every ability row carrying `tag`, and the owning channels,
    /// with the provided priority and/or weight. Returns the touched row
    /// count.
    async fn update_abilities_by_tag(
        &self,
        tag: &str,
        priority: Option<i64>,
        weight: Option<i64>,
    ) -> RelayResult<u64>;

    /// Repair pass: drop orphan ability rows, then rebuild every channel.
    async fn fix_abilities(&self) -> RelayResult<FixReport>;

    /// Distinct priorities of enabled abilities for `(group, model)`,
    /// highest first.
    async fn distinct_priorities(&self, group: &str, model: &str) -> RelayResult<Vec<i64>>;

    /// Enabled abilities for `(group, model)` at exactly `priority`,
    /// weight descending.
    async fn candidates(&self, group: &str, model: &str, priority: i64)
        -> RelayResult<Vec<Ability>>;

    /// Distinct public model names with at least one enabled ability,
    /// optionally restricted to a group. Sorted.
    async fn list_models(&self, group: Option<&str>) -> RelayResult<Vec<String>>;

    /// Liveness check used by the health endpoint.
    async fn ping(&self) -> RelayResult<()>;
}
