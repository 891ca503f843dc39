//! Configuration store: channels, tokens and pricing.
//!
//! The proxy only ever reads channels and pricing and increments token
//! usage. Writes beyond that happen once at startup, when the configured
//! records are seeded.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::channel::{Channel, PricingTable, Token};
use crate::config::Config;
use crate::error::Result;

/// Read side of the configuration store, as used per request.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_token(&self, key: &str) -> Result<Option<Token>>;

    /// All channels, or only those whose key is in `keys`.
    async fn get_channels(&self, keys: Option<&[String]>) -> Result<Vec<Channel>>;

    async fn get_global_pricing(&self) -> Result<PricingTable>;

    /// Atomically add `delta` to the token's usage counter.
    ///
    /// Returns `false` when no token with that key exists.
    async fn increment_token_usage(&self, key: &str, delta: f64) -> Result<bool>;
}

/// Write side used to seed the store from the config file.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    async fn upsert_channel(&self, channel: &Channel) -> Result<()>;

    /// Insert the token unless one with the same key already exists.
    /// Returns whether a row was inserted.
    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool>;

    async fn set_global_pricing(&self, pricing: &PricingTable) -> Result<()>;
}

/// Initialize the SQLite connection pool and run migrations.
///
/// The database file is created automatically if it doesn't exist.
/// WAL journal mode is used for concurrent read/write performance.
pub async fn init_pool(db_path: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    // Apply embedded migrations
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}

/// Write the configured channels, tokens and pricing into `store`.
///
/// Channels and pricing overwrite what is stored. Tokens are only inserted
/// when missing so that accumulated usage survives a restart.
pub async fn seed(store: &dyn StoreWriter, config: &Config) -> Result<()> {
    for channel in &config.channels {
        store.upsert_channel(channel).await?;
    }

    let mut inserted = 0usize;
    for token in &config.tokens {
        if store.insert_token_if_absent(&token.to_token()).await? {
            inserted += 1;
        }
    }

    if !config.pricing.is_empty() {
        store.set_global_pricing(&config.pricing).await?;
    }

    tracing::info!(
        channels = config.channels.len(),
        tokens_inserted = inserted,
        tokens_existing = config.tokens.len() - inserted,
        priced_models = config.pricing.len(),
        "Seeded configuration store"
    );
    Ok(())
}
