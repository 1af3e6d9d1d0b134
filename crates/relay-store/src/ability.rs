//! Ability rows and their derivation from channels.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// One `(group, model, channel)` routing row.
///
/// `model` is always the PUBLIC name a client requests; the owning
/// channel's mapping is applied later, at request build time. The routing
/// knobs are copies of the channel's values from the last rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    /// User group this row serves
    pub group: String,
    /// Public model name
    pub model: String,
    /// Owning channel
    pub channel_id: i64,
    /// Whether the row is selectable
    pub enabled: bool,
    /// Selection tier copied from the channel
    pub priority: i64,
    /// Share within the tier copied from the channel
    pub weight: i64,
    /// Label copied from the channel
    pub tag: Option<String>,
}

/// Derive the full ability set for a channel: the cross product of its
/// groups and its public models (served models plus mapping aliases).
#[must_use]
pub fn expand_abilities(channel: &Channel) -> Vec<Ability> {
    let models = channel.ability_models();
    let enabled = channel.status.is_enabled();
    let mut rows = Vec::with_capacity(channel.groups.len() * models.len());
    for group in &channel.groups {
        for model in &models {
            rows.push(Ability {
                group: group.clone(),
                model: model.clone(),
                channel_id: channel.id,
                enabled,
                priority: channel.priority,
                weight: channel.weight,
                tag: channel.tag.clone(),
            });
        }
    }
    rows
}
