//! Penalty-aware weighted channel selection.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use relay_core::{RelayError, RelayResult};
use relay_store::{Ability, AbilityIndex, Channel, RelayStore};

use crate::penalty::PenaltyLedger;

/// Additive smoothing applied to every candidate's weight.
///
/// Keeps zero-weight channels selectable and bounds how much of a channel's
/// share a penalty can take away: the effective weight never drops below 1.
pub const SMOOTHING: i64 = 10;

/// Outcome of a selection round.
#[derive(Debug, Clone)]
pub struct SelectedChannel {
    /// Full channel row for the winner
    pub channel: Channel,
    /// Priority tier the winner was drawn from
    pub priority: i64,
}

/// Draws a channel for one relay attempt.
///
/// Candidates come from a single priority tier (resolved per retry by the
/// [`AbilityIndex`]); each candidate's configured weight is smoothed and
/// then discounted by its live penalty before a uniform weighted draw.
pub struct ChannelSelector {
    store: Arc<dyn RelayStore>,
    index: AbilityIndex,
    ledger: Arc<PenaltyLedger>,
}

impl ChannelSelector {
    /// Create a selector over a store and a penalty ledger.
    pub fn new(store: Arc<dyn RelayStore>, ledger: Arc<PenaltyLedger>) -> Self {
        Self {
            index: AbilityIndex::new(store.clone()),
            store,
            ledger,
        }
    }

    /// The penalty ledger backing this selector.
    #[must_use]
    pub fn ledger(&self) -> &Arc<PenaltyLedger> {
        &self.ledger
    }

    /// Pick a channel for the given group/model pair.
    ///
    /// `retry_index` walks the priority ladder down one tier per retry;
    /// `exclude` drops channels already tried in this session.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoCandidates`] when the tier is empty (or fully
    ///   excluded).
    /// - [`RelayError::ChannelGone`] when the winning channel row vanished
    ///   between the ability lookup and the channel fetch.
    pub async fn select(
        &self,
        group: &str,
        model: &str,
        retry_index: u32,
        exclude: Option<&HashSet<i64>>,
    ) -> RelayResult<SelectedChannel> {
        let priority = self.index.resolve_tier(group, model, retry_index).await?;
        let mut candidates = self.store.candidates(group, model, priority).await?;
        if let Some(excluded) = exclude {
            candidates.retain(|a| !excluded.contains(&a.channel_id));
        }
        if candidates.is_empty() {
            return Err(RelayError::NoCandidates {
                group: group.to_string(),
                model: model.to_string(),
            });
        }

        let effective: Vec<i64> = candidates
            .iter()
            .map(|a| self.effective_weight(a))
            .collect();
        let total: i64 = effective.iter().sum();
        let draw = rand::thread_rng().gen_range(0..total);
        let winner = pick(&candidates, &effective, draw);

        let channel = self
            .store
            .get_channel(winner.channel_id)
            .await?
            .ok_or(RelayError::ChannelGone {
                channel_id: winner.channel_id,
            })?;

        debug!(
            group,
            model,
            retry_index,
            priority,
            channel_id = channel.id,
            channel = %channel.name,
            candidates = candidates.len(),
            "selected relay channel"
        );
        Ok(SelectedChannel { channel, priority })
    }

    /// Smoothed weight minus the live penalty, never below 1.
    fn effective_weight(&self, ability: &Ability) -> i64 {
        let ceiling = ability.weight + SMOOTHING;
        ceiling - self.ledger.penalty_weight(ability.channel_id, ceiling - 1)
    }
}

/// Walk the candidates subtracting effective weights until the draw lands.
///
/// Candidates and weights are parallel slices; a draw past the total falls
/// back to the last candidate.
fn pick<'a>(candidates: &'a [Ability], effective: &[i64], mut draw: i64) -> &'a Ability {
    debug_assert!(!candidates.is_empty());
    for (ability, weight) in candidates.iter().zip(effective) {
        draw -= weight;
        if draw < 0 {
            return ability;
        }
    }
    &candidates[candidates.len() - 1]
}
