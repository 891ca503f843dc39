//! Native Anthropic Messages adapter.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use serde_json::Value;
use std::sync::Arc;

use super::{
    forward_headers, is_stream, parse_endpoint, relay_buffered, relay_streaming, send,
    set_secret_header, ProviderAdapter, ProxyContext,
};
use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::proxy::stream::ClaudeUsageObserver;
use crate::quota::UsageSink;
use crate::usage;

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Forwards to the caller's path on the channel endpoint with `x-api-key`
/// and `anthropic-version` headers.
pub struct ClaudeAdapter;

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        let mut url = parse_endpoint(&channel.endpoint)?;
        url.set_path(&ctx.path);

        let mut headers = forward_headers(&ctx.headers);
        set_secret_header(
            &mut headers,
            HeaderName::from_static("x-api-key"),
            channel.secret().unwrap_or_default(),
        )?;
        let version = channel
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_str(version)
                .map_err(|_| Error::Internal(format!("Invalid anthropic-version '{}'", version)))?,
        );

        let upstream = send(ctx, url, headers, &body).await?;

        if is_stream(&body) {
            Ok(relay_streaming(ctx, upstream, ClaudeUsageObserver::default(), sink))
        } else {
            relay_buffered(upstream, sink.as_ref(), |json| {
                json.get("usage").and_then(usage::normalize)
            })
            .await
        }
    }
}
