//! OpenAI Chat Completions passthrough.

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;
use std::sync::Arc;

use super::{
    bearer_headers, ensure_include_usage, is_stream, parse_endpoint, relay_buffered,
    relay_streaming, send, ProviderAdapter, ProxyContext,
};
use crate::channel::ChannelConfig;
use crate::error::Result;
use crate::proxy::stream::ChatUsageObserver;
use crate::quota::UsageSink;
use crate::usage;

/// Forwards to `{endpoint origin}{caller path}` with bearer auth.
pub struct OpenAiAdapter;

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        mut body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        let stream = is_stream(&body);
        if stream {
            ensure_include_usage(&mut body);
        }

        let mut url = parse_endpoint(&channel.endpoint)?;
        url.set_path(&ctx.path);

        let upstream = send(ctx, url, bearer_headers(ctx, channel)?, &body).await?;

        if stream {
            Ok(relay_streaming(ctx, upstream, ChatUsageObserver, sink))
        } else {
            relay_buffered(upstream, sink.as_ref(), |json| {
                json.get("usage").and_then(usage::normalize)
            })
            .await
        }
    }
}
