//! Database schema migrations.
//!
//! Applied idempotently at startup; each migration runs inside a
//! transaction together with its bookkeeping row.

use sqlx::SqlitePool;
use tracing::info;

use relay_core::{RelayError, RelayResult};

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_channels",
        statements: &[
            r"
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                base_url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                models TEXT NOT NULL DEFAULT '[]',
                groups TEXT NOT NULL DEFAULT '[]',
                model_mapping TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 0,
                weight INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 1,
                tag TEXT,
                balance REAL NOT NULL DEFAULT 0,
                balance_updated_at TEXT,
                created_at TEXT NOT NULL
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status)",
            "CREATE INDEX IF NOT EXISTS idx_channels_tag ON channels(tag)",
        ],
    },
    Migration {
        version: 2,
        name: "create_abilities",
        statements: &[
            r"
            CREATE TABLE IF NOT EXISTS abilities (
                user_group TEXT NOT NULL,
                model TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                weight INTEGER NOT NULL DEFAULT 0,
                tag TEXT,
                PRIMARY KEY (user_group, model, channel_id)
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_abilities_lookup ON abilities(user_group, model, enabled, priority)",
            "CREATE INDEX IF NOT EXISTS idx_abilities_channel ON abilities(channel_id)",
            "CREATE INDEX IF NOT EXISTS idx_abilities_tag ON abilities(tag)",
        ],
    },
];

/// Bring the schema up to date. Safe to call on every boot.
pub(crate) async fn apply_migrations(pool: &SqlitePool) -> RelayResult<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(RelayError::store)?;

    for migration in MIGRATIONS {
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_optional(pool)
                .await
                .map_err(RelayError::store)?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await.map_err(RelayError::store)?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(RelayError::store)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(RelayError::store)?;
        tx.commit().await.map_err(RelayError::store)?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
    }

    Ok(())
}
