//! SQLite-backed configuration store.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{ConfigStore, StoreWriter};
use crate::channel::{Channel, ChannelConfig, PricingTable, Token};
use crate::error::{Error, Result};

/// Settings key holding the global pricing table.
const PRICING_SETTING: &str = "model_pricing";

/// Configuration store over the `channel_config`, `api_token` and
/// `settings` tables.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database at `path` and apply migrations.
    pub async fn open(path: &str) -> Result<Self> {
        Ok(Self::new(super::init_pool(path).await?))
    }
}

fn parse_channel(key: String, value: &str) -> Option<Channel> {
    match serde_json::from_str::<ChannelConfig>(value) {
        Ok(config) => Some(Channel { key, config }),
        Err(e) => {
            tracing::warn!(channel = %key, error = %e, "Skipping unreadable channel record");
            None
        }
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn get_token(&self, key: &str) -> Result<Option<Token>> {
        let row: Option<(String, f64)> =
            sqlx::query_as("SELECT value, usage FROM api_token WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((value, usage)) = row else {
            return Ok(None);
        };

        let mut token: Token = serde_json::from_str(&value)
            .map_err(|e| Error::Internal(format!("Corrupt token record: {}", e)))?;
        token.key = key.to_string();
        token.usage = usage;
        Ok(Some(token))
    }

    async fn get_channels(&self, keys: Option<&[String]>) -> Result<Vec<Channel>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT key, value FROM channel_config");
        if let Some(keys) = keys {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" WHERE key IN (");
            let mut separated = query.separated(", ");
            for key in keys {
                separated.push_bind(key.clone());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY rowid");

        let rows: Vec<(String, String)> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| parse_channel(key, &value))
            .collect())
    }

    async fn get_global_pricing(&self) -> Result<PricingTable> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(PRICING_SETTING)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("Corrupt pricing setting: {}", e))),
            None => Ok(PricingTable::new()),
        }
    }

    async fn increment_token_usage(&self, key: &str, delta: f64) -> Result<bool> {
        let result = sqlx::query("UPDATE api_token SET usage = usage + ? WHERE key = ?")
            .bind(delta)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StoreWriter for SqliteStore {
    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        let value = channel
            .config
            .to_record_string()
            .map_err(|e| Error::Internal(format!("Failed to encode channel: {}", e)))?;
        sqlx::query(
            "INSERT INTO channel_config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&channel.key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool> {
        let value = serde_json::json!({
            "key": token.key,
            "name": token.name,
            "channel_keys": token.channel_keys,
            "total_quota": token.total_quota,
        });
        let result = sqlx::query(
            "INSERT INTO api_token (key, value, usage) VALUES (?, ?, ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(&token.key)
        .bind(value.to_string())
        .bind(token.usage)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_global_pricing(&self, pricing: &PricingTable) -> Result<()> {
        let value = serde_json::to_string(pricing)
            .map_err(|e| Error::Internal(format!("Failed to encode pricing: {}", e)))?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(PRICING_SETTING)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
