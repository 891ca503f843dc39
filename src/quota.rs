//! Pricing resolution, cost computation and quota debiting.

use async_trait::async_trait;
use std::sync::Arc;

use crate::channel::{ChannelConfig, ModelPricing};
use crate::error::Result;
use crate::storage::ConfigStore;
use crate::usage::Usage;

/// Mask an API key for logging: keep the first and last thirds, replace the
/// middle third with `*`.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let third = chars.len() / 3;
    let head: String = chars[..third].iter().collect();
    let tail: String = chars[chars.len() - third..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 2 * third), tail)
}

/// Cost of `usage` under `pricing`, or `None` when prompt or completion
/// counts are unknown.
///
/// Cached tokens are billed at the cache price when one is set, otherwise
/// at the input price.
pub fn compute_cost(usage: &Usage, pricing: &ModelPricing) -> Option<f64> {
    let prompt = usage.prompt_tokens? as f64;
    let completion = usage.completion_tokens? as f64;
    let cached = usage.cached_tokens.unwrap_or(0) as f64;
    let cache_price = pricing.cache.unwrap_or(pricing.input);
    Some(prompt * pricing.input + completion * pricing.output + cached * cache_price)
}

/// Resolves pricing for a request and debits the caller's token.
#[derive(Clone)]
pub struct QuotaAccountant {
    store: Arc<dyn ConfigStore>,
}

impl QuotaAccountant {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Channel-level pricing for `model` first, then the global table.
    pub async fn resolve_pricing(
        &self,
        model: &str,
        channel: &ChannelConfig,
    ) -> Result<Option<ModelPricing>> {
        if let Some(price) = channel
            .model_pricing
            .as_ref()
            .and_then(|table| table.get(model))
        {
            return Ok(Some(*price));
        }
        Ok(self.store.get_global_pricing().await?.get(model).copied())
    }

    /// Bill `usage` against `api_key`.
    ///
    /// Returns the debited cost, or `None` when the request was not billed
    /// (no pricing, or incomplete usage).
    pub async fn process_usage(
        &self,
        api_key: &str,
        model: &str,
        channel_key: &str,
        channel: &ChannelConfig,
        usage: &Usage,
    ) -> Result<Option<f64>> {
        let masked = mask_api_key(api_key);

        let Some(pricing) = self.resolve_pricing(model, channel).await? else {
            tracing::warn!(
                token = %masked,
                model = %model,
                channel = %channel_key,
                "No pricing configured for model, skipping billing"
            );
            return Ok(None);
        };

        // Without a cache price, cached tokens are charged at the input rate
        // on top of the full prompt count.
        let Some(cost) = compute_cost(usage, &pricing) else {
            tracing::warn!(
                token = %masked,
                model = %model,
                channel = %channel_key,
                ?usage,
                "Usage is missing token counts, skipping billing"
            );
            return Ok(None);
        };

        if !self.store.increment_token_usage(api_key, cost).await? {
            tracing::warn!(token = %masked, cost, "Token disappeared before it could be billed");
            return Ok(None);
        }

        tracing::info!(
            token = %masked,
            model = %model,
            channel = %channel_key,
            prompt_tokens = ?usage.prompt_tokens,
            completion_tokens = ?usage.completion_tokens,
            cached_tokens = ?usage.cached_tokens,
            cost,
            "Billed request"
        );
        Ok(Some(cost))
    }
}

/// Receives the canonical usage of one request. Adapters call `save` at most
/// once per request.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn save(&self, usage: Usage);
}

/// Sink that bills one request through the accountant. Errors are logged
/// and swallowed: the response has already been served.
pub struct BillingSink {
    pub accountant: QuotaAccountant,
    pub api_key: String,
    pub model: String,
    pub channel_key: String,
    pub channel: ChannelConfig,
}

#[async_trait]
impl UsageSink for BillingSink {
    async fn save(&self, usage: Usage) {
        if let Err(e) = self
            .accountant
            .process_usage(
                &self.api_key,
                &self.model,
                &self.channel_key,
                &self.channel,
                &usage,
            )
            .await
        {
            tracing::warn!(
                token = %mask_api_key(&self.api_key),
                channel = %self.channel_key,
                error = %e,
                "Failed to bill request"
            );
        }
    }
}
