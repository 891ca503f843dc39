//! Provider adapters.
//!
//! Each channel type has one adapter that builds the outbound request,
//! relays the upstream response and reports usage through a [`UsageSink`].
//! The router looks adapters up in an [`AdapterRegistry`] keyed by
//! [`ChannelType`]; adding a provider means registering another adapter.

mod azure;
mod claude;
mod claude_to_openai;
mod openai;
mod responses;

pub use azure::AzureOpenAiAdapter;
pub use claude::ClaudeAdapter;
pub use claude_to_openai::ClaudeToOpenAiAdapter;
pub use openai::OpenAiAdapter;
pub use responses::{AzureResponsesAdapter, OpenAiResponsesAdapter};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::{ChannelConfig, ChannelType};
use crate::error::{Error, Result};
use crate::proxy::stream::{observe_usage, UsageObserver};
use crate::proxy::tasks::BackgroundTasks;
use crate::proxy::tee::tee;
use crate::quota::UsageSink;
use crate::usage::Usage;

/// Caller headers that are never forwarded upstream.
const DROPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "x-api-key",
    "content-length",
    "connection",
    "transfer-encoding",
    "accept-encoding",
];

/// Upstream headers that describe the upstream connection, not the body.
const DROPPED_RESPONSE_HEADERS: &[&str] = &["content-length", "connection", "transfer-encoding"];

/// Per-request inputs an adapter needs besides the channel and body.
#[derive(Clone)]
pub struct ProxyContext {
    pub http_client: Client,
    pub tasks: BackgroundTasks,
    /// Path of the inbound request, e.g. `/v1/chat/completions`.
    pub path: String,
    pub headers: HeaderMap,
}

/// One upstream protocol.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Forward `body` (model already rewritten to the deployment name) to
    /// the channel and return the response to relay to the caller.
    ///
    /// `sink` receives the request's usage at most once. For streaming
    /// responses that happens on a background task after this returns.
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response>;
}

/// Channel type → adapter lookup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChannelType, Box<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(ChannelType::OpenAi, OpenAiAdapter);
        registry.register(ChannelType::AzureOpenAi, AzureOpenAiAdapter);
        registry.register(ChannelType::Claude, ClaudeAdapter);
        registry.register(ChannelType::ClaudeToOpenAi, ClaudeToOpenAiAdapter);
        registry.register(ChannelType::OpenAiResponses, OpenAiResponsesAdapter);
        registry.register(ChannelType::AzureOpenAiResponses, AzureResponsesAdapter);
        registry
    }

    pub fn register<A: ProviderAdapter + 'static>(&mut self, channel_type: ChannelType, adapter: A) {
        self.adapters.insert(channel_type, Box::new(adapter));
    }

    pub fn get(&self, channel_type: &ChannelType) -> Option<&dyn ProviderAdapter> {
        self.adapters.get(channel_type).map(|a| a.as_ref())
    }
}

/// Whether the request body asks for a streamed response.
pub fn is_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

/// Force `stream_options.include_usage = true`, keeping other options.
pub fn ensure_include_usage(body: &mut Value) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    let options = object
        .entry("stream_options")
        .or_insert_with(|| Value::Object(Default::default()));
    if !options.is_object() {
        *options = Value::Object(Default::default());
    }
    if let Some(options) = options.as_object_mut() {
        options.insert("include_usage".to_string(), Value::Bool(true));
    }
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    Url::parse(endpoint)
        .map_err(|e| Error::Internal(format!("Invalid channel endpoint '{}': {}", endpoint, e)))
}

/// Replace (or add) the `api-version` query parameter.
pub(crate) fn set_api_version(url: &mut Url, api_version: Option<&str>) {
    let Some(version) = api_version else {
        return;
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "api-version")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("api-version", version);
}

/// Caller headers minus auth and connection-level ones, with a JSON
/// content type.
pub(crate) fn forward_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = incoming.clone();
    for name in DROPPED_REQUEST_HEADERS {
        headers.remove(*name);
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Set a credential header, marked sensitive so it is never logged.
pub(crate) fn set_secret_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| Error::Internal("Channel API key is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(())
}

pub(crate) fn bearer_headers(ctx: &ProxyContext, channel: &ChannelConfig) -> Result<HeaderMap> {
    let mut headers = forward_headers(&ctx.headers);
    let secret = channel.secret().unwrap_or_default();
    set_secret_header(&mut headers, header::AUTHORIZATION, &format!("Bearer {}", secret))?;
    Ok(headers)
}

/// POST `body` upstream. A transport failure becomes [`Error::Upstream`].
pub(crate) async fn send(
    ctx: &ProxyContext,
    url: Url,
    headers: HeaderMap,
    body: &Value,
) -> Result<reqwest::Response> {
    tracing::debug!(url = %url, "Forwarding request upstream");
    let response = ctx
        .http_client
        .post(url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to reach provider");
            Error::Upstream(e)
        })?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "Provider returned error status, relaying as-is");
    }
    Ok(response)
}

/// Status and relayable headers of an upstream response.
pub(crate) fn response_head(upstream: &reqwest::Response) -> (StatusCode, HeaderMap) {
    let mut headers = upstream.headers().clone();
    for name in DROPPED_RESPONSE_HEADERS {
        headers.remove(*name);
    }
    (upstream.status(), headers)
}

pub(crate) fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Buffer the upstream body, bill it when the status is 2xx, and relay it
/// unchanged.
///
/// `extract` receives the parsed JSON body. Parse failures and missing
/// usage are logged; the body is relayed either way.
pub(crate) async fn relay_buffered<F>(
    upstream: reqwest::Response,
    sink: &dyn UsageSink,
    extract: F,
) -> Result<Response>
where
    F: FnOnce(&Value) -> Option<Usage>,
{
    let (status, headers) = response_head(&upstream);
    let bytes = upstream.bytes().await?;

    if status.is_success() {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(json) => match extract(&json) {
                Some(usage) => sink.save(usage).await,
                None => tracing::warn!("Upstream response carried no usage"),
            },
            Err(e) => tracing::warn!(error = %e, "Failed to parse upstream response for usage"),
        }
    }

    Ok(build_response(status, headers, Body::from(bytes)))
}

/// Relay an upstream SSE body to the caller while a background task feeds
/// a copy through `observer`.
///
/// Non-2xx responses are relayed without observation.
pub(crate) fn relay_streaming<O>(
    ctx: &ProxyContext,
    upstream: reqwest::Response,
    observer: O,
    sink: Arc<dyn UsageSink>,
) -> Response
where
    O: UsageObserver + 'static,
{
    let (status, headers) = response_head(&upstream);
    if !status.is_success() {
        return build_response(status, headers, Body::from_stream(upstream.bytes_stream()));
    }

    let (client, observed) = tee(upstream.bytes_stream(), &ctx.tasks);
    ctx.tasks.spawn(observe_usage(observed, observer, sink));
    build_response(status, headers, Body::from_stream(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_registry_covers_every_type() {
        let registry = AdapterRegistry::standard();
        for tag in [
            "openai",
            "azure-openai",
            "claude",
            "claude-to-openai",
            "openai-responses",
            "azure-openai-responses",
        ] {
            assert!(registry.get(&ChannelType::from(tag)).is_some(), "missing {}", tag);
        }
        assert!(registry.get(&ChannelType::from("gemini")).is_none());
    }

    #[test]
    fn test_ensure_include_usage_adds_options() {
        let mut body = json!({"model": "gpt-4o", "stream": true});
        ensure_include_usage(&mut body);
        assert_eq!(body["stream_options"], json!({"include_usage": true}));
    }

    #[test]
    fn test_ensure_include_usage_keeps_other_keys() {
        let mut body = json!({"stream_options": {"include_usage": false, "chunk_size": 3}});
        ensure_include_usage(&mut body);
        assert_eq!(
            body["stream_options"],
            json!({"include_usage": true, "chunk_size": 3})
        );
    }

    #[test]
    fn test_forward_headers_drops_credentials() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        incoming.insert("x-api-key", HeaderValue::from_static("caller"));
        incoming.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        incoming.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        incoming.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        incoming.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let headers = forward_headers(&incoming);
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get("x-api-key").is_none());
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::ACCEPT_ENCODING).is_none());
        assert_eq!(headers.get("anthropic-beta").unwrap(), "tools-2024");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_set_api_version_replaces_existing() {
        let mut url = Url::parse("https://x.example.com/path?api-version=old&foo=1").unwrap();
        set_api_version(&mut url, Some("2024-06-01"));
        assert_eq!(url.as_str(), "https://x.example.com/path?foo=1&api-version=2024-06-01");

        let mut untouched = Url::parse("https://x.example.com/path").unwrap();
        set_api_version(&mut untouched, None);
        assert_eq!(untouched.as_str(), "https://x.example.com/path");
    }

    #[test]
    fn test_is_stream() {
        assert!(is_stream(&json!({"stream": true})));
        assert!(!is_stream(&json!({"stream": false})));
        assert!(!is_stream(&json!({"stream": "yes"})));
        assert!(!is_stream(&json!({})));
    }
}
