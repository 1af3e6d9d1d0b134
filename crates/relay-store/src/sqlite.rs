//! SQLite-backed store.
//!
//! Runtime queries throughout; the per-channel ability rebuild and the
//! repair pass run inside transactions so a crash or a concurrent reader
//! never sees a half-rebuilt channel.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

use relay_core::{ChannelKind, RelayError, RelayResult};

use crate::ability::{expand_abilities, Ability};
use crate::channel::{Channel, ChannelDraft, ChannelStatus};
use crate::schema;
use crate::store::{FixReport, RelayStore};

/// SQLite-backed [`RelayStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    name: String,
    kind: String,
    base_url: String,
    api_key: String,
    models: String,
    groups: String,
    model_mapping: String,
    priority: i64,
    weight: i64,
    status: i64,
    tag: Option<String>,
    balance: f64,
    balance_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = RelayError;

    fn try_from(row: ChannelRow) -> Result<Self, Self::Error> {
        let models: Vec<String> =
            serde_json::from_str(&row.models).map_err(RelayError::store)?;
        let groups: Vec<String> =
            serde_json::from_str(&row.groups).map_err(RelayError::store)?;
        let model_mapping: HashMap<String, String> =
            serde_json::from_str(&row.model_mapping).map_err(RelayError::store)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            kind: row.kind.parse::<ChannelKind>()?,
            base_url: row.base_url,
            api_key: SecretString::new(row.api_key),
            models,
            groups,
            model_mapping,
            priority: row.priority,
            weight: row.weight,
            status: ChannelStatus::from_i64(row.status)?,
            tag: row.tag,
            balance: row.balance,
            balance_updated_at: row.balance_updated_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AbilityRow {
    user_group: String,
    model: String,
    channel_id: i64,
    enabled: bool,
    priority: i64,
    weight: i64,
    tag: Option<String>,
}

impl From<AbilityRow> for Ability {
    fn from(row: AbilityRow) -> Self {
        Self {
            group: row.user_group,
            model: row.model,
            channel_id: row.channel_id,
            enabled: row.enabled,
            priority: row.priority,
            weight: row.weight,
            tag: row.tag,
        }
    }
}

const SELECT_CHANNEL: &str = r"
    SELECT id, name, kind, base_url, api_key, models, groups, model_mapping,
           priority, weight, status, tag, balance, balance_updated_at, created_at
    FROM channels
";

const SELECT_ABILITY: &str = r"
    SELECT user_group, model, channel_id, enabled, priority, weight, tag
    FROM abilities
";

impl SqliteStore {
    /// Connect, sizing the pool, and bring the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> RelayResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(RelayError::store)?;
        schema::apply_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory store, for tests and embedded use.
    ///
    /// A single connection keeps every query on the same in-memory
    /// database.
    pub async fn in_memory() -> RelayResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(RelayError::store)?;
        schema::apply_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, for maintenance tooling.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_ability_rows(
        tx: &mut Transaction<'_, Sqlite>,
        channel: &Channel,
    ) -> RelayResult<()> {
        for ability in expand_abilities(channel) {
            sqlx::query(
                r"
                INSERT OR REPLACE INTO abilities
                    (user_group, model, channel_id, enabled, priority, weight, tag)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&ability.group)
            .bind(&ability.model)
            .bind(ability.channel_id)
            .bind(ability.enabled)
            .bind(ability.priority)
            .bind(ability.weight)
            .bind(&ability.tag)
            .execute(&mut **tx)
            .await
            .map_err(RelayError::store)?;
        }
        Ok(())
    }

    fn draft_to_channel(
        id: i64,
        draft: &ChannelDraft,
        status: ChannelStatus,
        balance: f64,
        balance_updated_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Channel {
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
            status,
            tag: draft.tag.clone(),
            balance,
            balance_updated_at,
            created_at,
        }
    }
}

#[async_trait]
impl RelayStore for SqliteStore {
    async fn insert_channel(&self, draft: ChannelDraft) -> RelayResult<Channel> {
        draft.validate()?;
        let now = Utc::now();
        let models = serde_json::to_string(&draft.models).map_err(RelayError::store)?;
        let groups = serde_json::to_string(&draft.groups).map_err(RelayError::store)?;
        let mapping = serde_json::to_string(&draft.model_mapping).map_err(RelayError::store)?;

        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        let result = sqlx::query(
            r"
            INSERT INTO channels
                (name, kind, base_url, api_key, models, groups, model_mapping,
                 priority, weight, status, tag, balance, balance_updated_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
            ",
        )
        .bind(&draft.name)
        .bind(draft.kind.as_str())
        .bind(draft.normalized_base_url())
        .bind(&draft.api_key)
        .bind(&models)
        .bind(&groups)
        .bind(&mapping)
        .bind(draft.priority)
        .bind(draft.weight)
        .bind(ChannelStatus::Enabled.as_i64())
        .bind(&draft.tag)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(RelayError::store)?;

        let channel = Self::draft_to_channel(
            result.last_insert_rowid(),
            &draft,
            ChannelStatus::Enabled,
            0.0,
            None,
            now,
        );
        Self::insert_ability_rows(&mut tx, &channel).await?;
        tx.commit().await.map_err(RelayError::store)?;

        debug!(channel_id = channel.id, name = %channel.name, "channel created");
        Ok(channel)
    }

    async fn get_channel(&self, id: i64) -> RelayResult<Option<Channel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!("{SELECT_CHANNEL} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RelayError::store)?;
        row.map(Channel::try_from).transpose()
    }

    async fn list_channels(&self) -> RelayResult<Vec<Channel>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!("{SELECT_CHANNEL} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(RelayError::store)?;
        rows.into_iter().map(Channel::try_from).collect()
    }

    async fn update_channel(&self, id: i64, draft: ChannelDraft) -> RelayResult<Channel> {
        draft.validate()?;
        let existing = self
            .get_channel(id)
            .await?
            .ok_or(RelayError::ChannelGone { channel_id: id })?;

        let models = serde_json::to_string(&draft.models).map_err(RelayError::store)?;
        let groups = serde_json::to_string(&draft.groups).map_err(RelayError::store)?;
        let mapping = serde_json::to_string(&draft.model_mapping).map_err(RelayError::store)?;

        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        sqlx::query(
            r"
            UPDATE channels
            SET name = ?, kind = ?, base_url = ?, api_key = ?, models = ?,
                groups = ?, model_mapping = ?, priority = ?, weight = ?, tag = ?
            WHERE id = ?
            ",
        )
        .bind(&draft.name)
        .bind(draft.kind.as_str())
        .bind(draft.normalized_base_url())
        .bind(&draft.api_key)
        .bind(&models)
        .bind(&groups)
        .bind(&mapping)
        .bind(draft.priority)
        .bind(draft.weight)
        .bind(&draft.tag)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(RelayError::store)?;

        let channel = Self::draft_to_channel(
            id,
            &draft,
            existing.status,
            existing.balance,
            existing.balance_updated_at,
            existing.created_at,
        );
        sqlx::query("DELETE FROM abilities WHERE channel_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        Self::insert_ability_rows(&mut tx, &channel).await?;
        tx.commit().await.map_err(RelayError::store)?;

        debug!(channel_id = id, "channel updated, abilities rebuilt");
        Ok(channel)
    }

    async fn delete_channel(&self, id: i64) -> RelayResult<bool> {
        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        sqlx::query("DELETE FROM abilities WHERE channel_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        tx.commit().await.map_err(RelayError::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_channel_status(&self, id: i64, status: ChannelStatus) -> RelayResult<bool> {
        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        let result = sqlx::query("UPDATE channels SET status = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("UPDATE abilities SET enabled = ? WHERE channel_id = ?")
            .bind(status.is_enabled())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        tx.commit().await.map_err(RelayError::store)?;
        Ok(true)
    }

    async fn update_channel_balance(&self, id: i64, balance: f64) -> RelayResult<()> {
        sqlx::query("UPDATE channels SET balance = ?, balance_updated_at = ? WHERE id = ?")
            .bind(balance)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }

    async fn rebuild_abilities(&self, channel: &Channel) -> RelayResult<()> {
        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        sqlx::query("DELETE FROM abilities WHERE channel_id = ?")
            .bind(channel.id)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        Self::insert_ability_rows(&mut tx, channel).await?;
        tx.commit().await.map_err(RelayError::store)?;
        Ok(())
    }

    async fn delete_abilities(&self, channel_id: i64) -> RelayResult<u64> {
        let result = sqlx::query("DELETE FROM abilities WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(RelayError::store)?;
        Ok(result.rows_affected())
    }

    async fn set_abilities_enabled(&self, channel_id: i64, enabled: bool) -> RelayResult<u64> {
        let result = sqlx::query("UPDATE abilities SET enabled = ? WHERE channel_id = ?")
            .bind(enabled)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(RelayError::store)?;
        Ok(result.rows_affected())
    }

    async fn update_abilities_by_tag(
        &self,
        tag: &str,
        priority: Option<i64>,
        weight: Option<i64>,
    ) -> RelayResult<u64> {
        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        let touched = match (priority, weight) {
            (None, None) => 0,
            (Some(p), None) => {
                sqlx::query("UPDATE channels SET priority = ? WHERE tag = ?")
                    .bind(p)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?;
                sqlx::query("UPDATE abilities SET priority = ? WHERE tag = ?")
                    .bind(p)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?
                    .rows_affected()
            }
            (None, Some(w)) => {
                sqlx::query("UPDATE channels SET weight = ? WHERE tag = ?")
                    .bind(w)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?;
                sqlx::query("UPDATE abilities SET weight = ? WHERE tag = ?")
                    .bind(w)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?
                    .rows_affected()
            }
            (Some(p), Some(w)) => {
                sqlx::query("UPDATE channels SET priority = ?, weight = ? WHERE tag = ?")
                    .bind(p)
                    .bind(w)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?;
                sqlx::query("UPDATE abilities SET priority = ?, weight = ? WHERE tag = ?")
                    .bind(p)
                    .bind(w)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await
                    .map_err(RelayError::store)?
                    .rows_affected()
            }
        };
        tx.commit().await.map_err(RelayError::store)?;
        Ok(touched)
    }

    async fn fix_abilities(&self) -> RelayResult<FixReport> {
        let mut tx = self.pool.begin().await.map_err(RelayError::store)?;
        let removed = sqlx::query(
            "DELETE FROM abilities WHERE channel_id NOT IN (SELECT id FROM channels)",
        )
        .execute(&mut *tx)
        .await
        .map_err(RelayError::store)?
        .rows_affected();

        let rows = sqlx::query_as::<_, ChannelRow>(&format!("{SELECT_CHANNEL} ORDER BY id"))
            .fetch_all(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        let mut rebuilt = 0;
        for row in rows {
            let channel = Channel::try_from(row)?;
            sqlx::query("DELETE FROM abilities WHERE channel_id = ?")
                .bind(channel.id)
                .execute(&mut *tx)
                .await
                .map_err(RelayError::store)?;
            Self::insert_ability_rows(&mut tx, &channel).await?;
            rebuilt += 1;
        }
        tx.commit().await.map_err(RelayError::store)?;

        debug!(removed_orphans = removed, rebuilt_channels = rebuilt, "abilities repaired");
        Ok(FixReport {
            removed_orphans: removed,
            rebuilt_channels: rebuilt,
        })
    }

    async fn distinct_priorities(&self, group: &str, model: &str) -> RelayResult<Vec<i64>> {
        sqlx::query_scalar(
            r"
            SELECT DISTINCT priority FROM abilities
            WHERE user_group = ? AND model = ? AND enabled = 1
            ORDER BY priority DESC
            ",
        )
        .bind(group)
        .bind(model)
        .fetch_all(&self.pool)
        .await
        .map_err(RelayError::store)
    }

    async fn candidates(
        &self,
        group: &str,
        model: &str,
        priority: i64,
    ) -> RelayResult<Vec<Ability>> {
        let rows = sqlx::query_as::<_, AbilityRow>(&format!(
            r"
            {SELECT_ABILITY}
            WHERE user_group = ? AND model = ? AND enabled = 1 AND priority = ?
            ORDER BY weight DESC, channel_id ASC
            "
        ))
        .bind(group)
        .bind(model)
        .bind(priority)
        .fetch_all(&self.pool)
        .await
        .map_err(RelayError::store)?;
        Ok(rows.into_iter().map(Ability::from).collect())
    }

    async fn list_models(&self, group: Option<&str>) -> RelayResult<Vec<String>> {
        let models = match group {
            Some(group) => {
                sqlx::query_scalar(
                    r"
                    SELECT DISTINCT model FROM abilities
                    WHERE enabled = 1 AND user_group = ?
                    ORDER BY model
                    ",
                )
                .bind(group)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar(
                    "SELECT DISTINCT model FROM abilities WHERE enabled = 1 ORDER BY model",
                )
                .fetch_all(&self.pool)
                .await
            }
        };
        models.map_err(RelayError::store)
    }

    async fn ping(&self) -> RelayResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }
}
