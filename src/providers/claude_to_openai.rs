//! Serves Claude Messages callers from an OpenAI-compatible upstream.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    bearer_headers, build_response, parse_endpoint, response_head, send, ProviderAdapter,
    ProxyContext,
};
use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::quota::UsageSink;
use crate::translate::{
    claude_to_openai, openai_to_claude_response, ChatCompletion, ClaudeRequest,
    ClaudeStreamTransformer,
};
use crate::usage;

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Translates the Claude request to chat completions, sends it with bearer
/// auth, and translates the answer back.
pub struct ClaudeToOpenAiAdapter;

#[async_trait]
impl ProviderAdapter for ClaudeToOpenAiAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        let request: ClaudeRequest = serde_json::from_value(body)
            .map_err(|e| Error::BadRequest(format!("Invalid Claude request: {}", e)))?;
        let stream = request.stream.unwrap_or(false);

        let mut chat = claude_to_openai(&request);
        if stream {
            chat.stream_options = Some(json!({"include_usage": true}));
        }
        let chat = serde_json::to_value(&chat)
            .map_err(|e| Error::Internal(format!("Failed to encode chat request: {}", e)))?;

        let url = parse_endpoint(&channel.endpoint)?
            .join(CHAT_COMPLETIONS_PATH)
            .map_err(|e| Error::Internal(format!("Invalid channel endpoint: {}", e)))?;

        let upstream = send(ctx, url, bearer_headers(ctx, channel)?, &chat).await?;

        if stream {
            Ok(translate_stream(ctx, upstream, sink))
        } else {
            translate_buffered(upstream, sink.as_ref()).await
        }
    }
}

/// Pump the upstream OpenAI stream through the transformer on a background
/// task and hand the Claude events to the caller as they are produced.
///
/// The pump keeps running if the caller disconnects, so usage is still
/// saved once the upstream finishes.
fn translate_stream(
    ctx: &ProxyContext,
    upstream: reqwest::Response,
    sink: Arc<dyn UsageSink>,
) -> Response {
    let (status, mut headers) = response_head(&upstream);
    if !status.is_success() {
        return build_response(status, headers, Body::from_stream(upstream.bytes_stream()));
    }

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );

    let (tx, rx) = mpsc::unbounded_channel::<std::result::Result<bytes::Bytes, std::io::Error>>();
    let chunks = upstream.bytes_stream();

    ctx.tasks.spawn(async move {
        let mut chunks = Box::pin(chunks);
        let mut transformer = ClaudeStreamTransformer::new();

        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    let events = transformer.push(&chunk);
                    if !events.is_empty() {
                        let _ = tx.send(Ok(events));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream failed mid-response");
                    break;
                }
            }
        }

        let tail = transformer.finish();
        if !tail.is_empty() {
            let _ = tx.send(Ok(tail));
        }
        drop(tx);

        match transformer.usage() {
            Some(usage) => sink.save(usage).await,
            None => tracing::warn!("Translated stream ended without usage information"),
        }
    });

    build_response(status, headers, Body::from_stream(UnboundedReceiverStream::new(rx)))
}

/// Translate a complete chat response. Bodies that do not parse as a chat
/// completion, and error statuses, are relayed untouched.
async fn translate_buffered(upstream: reqwest::Response, sink: &dyn UsageSink) -> Result<Response> {
    let (status, mut headers) = response_head(&upstream);
    let bytes = upstream.bytes().await?;
    if !status.is_success() {
        return Ok(build_response(status, headers, Body::from(bytes)));
    }

    let completion: ChatCompletion = match serde_json::from_slice(&bytes) {
        Ok(completion) => completion,
        Err(e) => {
            tracing::warn!(error = %e, "Upstream body is not a chat completion, relaying as-is");
            return Ok(build_response(status, headers, Body::from(bytes)));
        }
    };

    match completion.usage.as_ref().and_then(usage::normalize) {
        Some(usage) => sink.save(usage).await,
        None => tracing::warn!("Upstream response carried no usage"),
    }

    let translated = serde_json::to_vec(&openai_to_claude_response(&completion))
        .map_err(|e| Error::Internal(format!("Failed to encode Claude response: {}", e)))?;
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(build_response(status, headers, Body::from(translated)))
}
