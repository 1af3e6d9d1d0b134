//! Priority tier resolution.

use std::sync::Arc;

use relay_core::{RelayError, RelayResult};
use tracing::debug;

use crate::ability::Ability;
use crate::store::RelayStore;

/// Resolves which priority tier a relay attempt should draw candidates from.
///
/// Channels are grouped into tiers by their `priority` value, highest tier
/// first. The first attempt uses the highest tier; each retry moves one tier
/// down. Once the retry count runs past the lowest tier, every further
/// attempt stays clamped to that lowest tier so retries never run out of
/// candidates merely because the ladder is short.
#[derive(Clone)]
pub struct AbilityIndex {
    store: Arc<dyn RelayStore>,
}

impl AbilityIndex {
    /// Wraps a store.
    pub fn new(store: Arc<dyn RelayStore>) -> Self {
        Self { store }
    }

    /// Priority tier for the given attempt, highest first, clamped to the
    /// lowest tier.
    ///
    /// # Errors
    ///
    /// [`RelayError::NoCandidates`] when no enabled channel serves the
    /// group/model pair at all.
    pub async fn resolve_tier(
        &self,
        group: &str,
        model: &str,
        retry_index: u32,
    ) -> RelayResult<i64> {
        let priorities = self.store.distinct_priorities(group, model).await?;
        if priorities.is_empty() {
            return Err(RelayError::NoCandidates {
                group: group.to_string(),
                model: model.to_string(),
            });
        }
        let idx = (retry_index as usize).min(priorities.len() - 1);
        let tier = priorities[idx];
        debug!(group, model, retry_index, tier, "resolved priority tier");
        Ok(tier)
    }

    /// Enabled candidates in one tier, heaviest first.
    pub async fn candidates(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> RelayResult<Vec<Ability>> {
        self.store.candidates(group, model, priority).await
    }
}
