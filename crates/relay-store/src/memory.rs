//! In-memory store.
//!
//! Mirrors the observable semantics of [`SqliteStore`](crate::SqliteStore);
//! a single lock keeps channel-scoped mutations atomic. Used by unit tests
//! across the workspace and usable for embedded deployments that do not
//! need persistence.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use secrecy::SecretString;

use relay_core::{RelayError, RelayResult};

use crate::ability::{expand_abilities, Ability};
use crate::channel::{Channel, ChannelDraft, ChannelStatus};
use crate::store::{FixReport, RelayStore};

#[derive(Default)]
struct Inner {
    next_id: i64,
    channels: BTreeMap<i64, Channel>,
    abilities: Vec<Ability>,
}

/// In-memory [`RelayStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn build_channel(id: i64, draft: &ChannelDraft, base: Option<&Channel>) -> Channel {
        Channel {
            id,
            name: draft.name.clone(),
            kind: draft.kind,
            base_url: draft.normalized_base_url(),
            api_key: SecretString::new(draft.api_key.clone()),
            models: draft.models.clone(),
            groups: draft.groups.clone(),
            model_mapping: draft.model_mapping.clone(),
            priority: draft.priority,
            weight: draft.weight,
            status: base.map_or(ChannelStatus::Enabled, |c| c.status),
            tag: draft.tag.clone(),
            balance: base.map_or(0.0, |c| c.balance),
            balance_updated_at: base.and_then(|c| c.balance_updated_at),
            created_at: base.map_or_else(Utc::now, |c| c.created_at),
        }
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn insert_channel(&self, draft: ChannelDraft) -> RelayResult<Channel> {
        draft.validate()?;
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;
        let channel = Self::build_channel(id, &draft, None);
        let rows = expand_abilities(&channel);
        inner.channels.insert(id, channel.clone());
        inner.abilities.extend(rows);
        Ok(channel)
    }

    async fn get_channel(&self, id: i64) -> RelayResult<Option<Channel>> {
        Ok(self.inner.read().channels.get(&id).cloned())
    }

    async fn list_channels(&self) -> RelayResult<Vec<Channel>> {
        Ok(self.inner.read().channels.values().cloned().collect())
    }

    async fn update_channel(&self, id: i64, draft: ChannelDraft) -> RelayResult<Channel> {
        draft.validate()?;
        let mut inner = self.inner.write();
        let existing = inner
            .channels
            .get(&id)
            .cloned()
            .ok_or(RelayError::ChannelGone { channel_id: id })?;
        let channel = Self::build_channel(id, &draft, Some(&existing));
        let rows = expand_abilities(&channel);
        inner.channels.insert(id, channel.clone());
        inner.abilities.retain(|a| a.channel_id != id);
        inner.abilities.extend(rows);
        Ok(channel)
    }

    async fn delete_channel(&self, id: i64) -> RelayResult<bool> {
        let mut inner = self.inner.write();
        let existed = inner.channels.remove(&id).is_some();
        inner.abilities.retain(|a| a.channel_id != id);
        Ok(existed)
    }

    async fn set_channel_status(&self, id: i64, status: ChannelStatus) -> RelayResult<bool> {
        let mut inner = self.inner.write();
        let Some(channel) = inner.channels.get_mut(&id) else {
            return Ok(false);
        };
        channel.status = status;
        let enabled = status.is_enabled();
        for ability in inner.abilities.iter_mut().filter(|a| a.channel_id == id) {
            ability.enabled = enabled;
        }
        Ok(true)
    }

    async fn update_channel_balance(&self, id: i64, balance: f64) -> RelayResult<()> {
        let mut inner = self.inner.write();
        if let Some(channel) = inner.channels.get_mut(&id) {
            channel.balance = balance;
            channel.balance_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn rebuild_abilities(&self, channel: &Channel) -> RelayResult<()> {
        let mut inner = self.inner.write();
        inner.abilities.retain(|a| a.channel_id != channel.id);
        inner.abilities.extend(expand_abilities(channel));
        Ok(())
    }

    async fn delete_abilities(&self, channel_id: i64) -> RelayResult<u64> {
        let mut inner = self.inner.write();
        let before = inner.abilities.len();
        inner.abilities.retain(|a| a.channel_id != channel_id);
        Ok((before - inner.abilities.len()) as u64)
    }

    async fn set_abilities_enabled(&self, channel_id: i64, enabled: bool) -> RelayResult<u64> {
        let mut inner = self.inner.write();
        let mut touched = 0;
        for ability in inner
            .abilities
            .iter_mut()
            .filter(|a| a.channel_id == channel_id)
        {
            ability.enabled = enabled;
            touched += 1;
        }
        Ok(touched)
    }

    async fn update_abilities_by_tag(
        &self,
        tag: &str,
        priority: Option<i64>,
        weight: Option<i64>,
    ) -> RelayResult<u64> {
        if priority.is_none() && weight.is_none() {
            return Ok(0);
        }
        let mut inner = self.inner.write();
        for channel in inner
            .channels
            .values_mut()
            .filter(|c| c.tag.as_deref() == Some(tag))
        {
            if let Some(p) = priority {
                channel.priority = p;
            }
            if let Some(w) = weight {
                channel.weight = w;
            }
        }
        let mut touched = 0;
        for ability in inner
            .abilities
            .iter_mut()
            .filter(|a| a.tag.as_deref() == Some(tag))
        {
            if let Some(p) = priority {
                ability.priority = p;
            }
            if let Some(w) = weight {
                ability.weight = w;
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn fix_abilities(&self) -> RelayResult<FixReport> {
        let mut inner = self.inner.write();
        let before = inner.abilities.len();
        let known: BTreeSet<i64> = inner.channels.keys().copied().collect();
        inner.abilities.retain(|a| known.contains(&a.channel_id));
        let removed = (before - inner.abilities.len()) as u64;

        let channels: Vec<Channel> = inner.channels.values().cloned().collect();
        for channel in &channels {
            inner.abilities.retain(|a| a.channel_id != channel.id);
            inner.abilities.extend(expand_abilities(channel));
        }
        Ok(FixReport {
            removed_orphans: removed,
            rebuilt_channels: channels.len() as u64,
        })
    }

    async fn distinct_priorities(&self, group: &str, model: &str) -> RelayResult<Vec<i64>> {
        let inner = self.inner.read();
        let set: BTreeSet<i64> = inner
            .abilities
            .iter()
            .filter(|a| a.enabled && a.group == group && a.model == model)
            .map(|a| a.priority)
            .collect();
        Ok(set.into_iter().rev().collect())
    }

    async fn candidates(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> RelayResult<Vec<Ability>> {
        let inner = self.inner.read();
        let mut rows: Vec<Ability> = inner
            .abilities
            .iter()
            .filter(|a| a.enabled && a.group == group && a.model == model && a.priority == priority)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.channel_id.cmp(&b.channel_id)));
        Ok(rows)
    }

    async fn list_models(&self, group: Option<&str>) -> RelayResult<Vec<String>> {
        let inner = self.inner.read();
        let set: BTreeSet<String> = inner
            .abilities
            .iter()
            .filter(|a| a.enabled && group.map_or(true, |g| a.group == g))
            .map(|a| a.model.clone())
            .collect();
        Ok(set.into_iter().collect())
    }

    async fn ping(&self) -> RelayResult<()> {
        Ok(())
    }
}
