//! In-memory configuration store for tests and database-less runs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ConfigStore, StoreWriter};
use crate::channel::{Channel, ModelPricing, PricingTable, Token};
use crate::error::Result;

/// Store backed by concurrent maps. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    /// Channels with their insertion sequence, so reads keep a stable order.
    channels: DashMap<String, (u64, Channel)>,
    tokens: DashMap<String, Token>,
    pricing: DashMap<String, ModelPricing>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a token, usage included.
    pub fn put_token(&self, token: Token) {
        self.tokens.insert(token.key.clone(), token);
    }

    /// Insert or replace a channel.
    pub fn put_channel(&self, channel: Channel) {
        let seq = self
            .channels
            .get(&channel.key)
            .map(|entry| entry.0)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        self.channels.insert(channel.key.clone(), (seq, channel));
    }

    pub fn put_pricing(&self, model: &str, pricing: ModelPricing) {
        self.pricing.insert(model.to_string(), pricing);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_token(&self, key: &str) -> Result<Option<Token>> {
        Ok(self.tokens.get(key).map(|t| t.clone()))
    }

    async fn get_channels(&self, keys: Option<&[String]>) -> Result<Vec<Channel>> {
        let mut found: Vec<(u64, Channel)> = self
            .channels
            .iter()
            .filter(|entry| keys.map_or(true, |keys| keys.contains(entry.key())))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found.into_iter().map(|(_, channel)| channel).collect())
    }

    async fn get_global_pricing(&self) -> Result<PricingTable> {
        Ok(self
            .pricing
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    async fn increment_token_usage(&self, key: &str, delta: f64) -> Result<bool> {
        // The shard write lock makes the read-add-write a single step.
        match self.tokens.get_mut(key) {
            Some(mut token) => {
                token.usage += delta;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl StoreWriter for MemoryStore {
    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        self.put_channel(channel.clone());
        Ok(())
    }

    async fn insert_token_if_absent(&self, token: &Token) -> Result<bool> {
        match self.tokens.entry(token.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(true)
            }
        }
    }

    async fn set_global_pricing(&self, pricing: &PricingTable) -> Result<()> {
        self.pricing.clear();
        for (model, price) in pricing {
            self.pricing.insert(model.clone(), *price);
        }
        Ok(())
    }
}
