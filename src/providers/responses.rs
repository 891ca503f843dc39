//! OpenAI Responses API adapters (OpenAI and Azure flavours).
//!
//! Responses streams report usage only on `response.completed`, and some
//! compatible servers omit it entirely, so both flavours fall back to a
//! size-based estimate.

use async_trait::async_trait;
use axum::response::Response;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

use super::azure::{api_key_headers, azure_url};
use super::{
    bearer_headers, is_stream, parse_endpoint, relay_buffered, relay_streaming, send,
    ProviderAdapter, ProxyContext,
};
use crate::channel::ChannelConfig;
use crate::error::Result;
use crate::proxy::stream::ResponsesUsageObserver;
use crate::quota::UsageSink;
use crate::usage::{self, Usage};

pub struct OpenAiResponsesAdapter;

pub struct AzureResponsesAdapter;

/// Usage reported by a complete responses object, else an estimate from
/// the request and response sizes.
fn buffered_usage(request: &Value, response: &Value) -> Option<Usage> {
    usage::extract_from_response(response).or_else(|| {
        tracing::debug!("Responses body has no usage, estimating from payload size");
        usage::estimate_usage(Some(request), Some(response), None)
    })
}

async fn relay(
    ctx: &ProxyContext,
    url: Url,
    headers: axum::http::HeaderMap,
    body: Value,
    sink: Arc<dyn UsageSink>,
) -> Result<Response> {
    let upstream = send(ctx, url, headers, &body).await?;

    if is_stream(&body) {
        Ok(relay_streaming(ctx, upstream, ResponsesUsageObserver::new(body), sink))
    } else {
        relay_buffered(upstream, sink.as_ref(), |json| buffered_usage(&body, json)).await
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiResponsesAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        let mut url = parse_endpoint(&channel.endpoint)?;
        url.set_path(&ctx.path);
        relay(ctx, url, bearer_headers(ctx, channel)?, body, sink).await
    }
}

#[async_trait]
impl ProviderAdapter for AzureResponsesAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        let url = azure_url(channel, "/openai/responses")?;
        relay(ctx, url, api_key_headers(ctx, channel)?, body, sink).await
    }
}
