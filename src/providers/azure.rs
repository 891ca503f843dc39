//! Azure OpenAI chat adapter.

use async_trait::async_trait;
use axum::http::HeaderName;
use axum::response::Response;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

use super::{
    ensure_include_usage, forward_headers, is_stream, parse_endpoint, relay_buffered,
    relay_streaming, send, set_api_version, set_secret_header, ProviderAdapter, ProxyContext,
};
use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::proxy::stream::ChatUsageObserver;
use crate::quota::UsageSink;
use crate::usage;

/// Azure OpenAI: deployment-scoped routes, `api-key` auth, `api-version`
/// query parameter.
pub struct AzureOpenAiAdapter;

/// Build an Azure URL for `route` (which must start with `/`).
///
/// An endpoint ending in `#` is taken verbatim; otherwise its path is kept
/// as a prefix in front of `route`.
pub(crate) fn azure_url(channel: &ChannelConfig, route: &str) -> Result<Url> {
    let mut url = match channel.endpoint.strip_suffix('#') {
        Some(verbatim) => parse_endpoint(verbatim)?,
        None => {
            let mut url = parse_endpoint(&channel.endpoint)?;
            let prefix = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}{}", prefix, route));
            url
        }
    };
    set_api_version(&mut url, channel.api_version.as_deref());
    Ok(url)
}

pub(crate) fn api_key_headers(ctx: &ProxyContext, channel: &ChannelConfig) -> Result<axum::http::HeaderMap> {
    let mut headers = forward_headers(&ctx.headers);
    set_secret_header(
        &mut headers,
        HeaderName::from_static("api-key"),
        channel.secret().unwrap_or_default(),
    )?;
    Ok(headers)
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiAdapter {
    async fn fetch(
        &self,
        ctx: &ProxyContext,
        channel: &ChannelConfig,
        mut body: Value,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Response> {
        // The router has already replaced the model with the deployment name.
        let deployment = body
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("Azure request has no deployment name".to_string()))?;

        let stream = is_stream(&body);
        if stream {
            ensure_include_usage(&mut body);
        }

        let operation = ctx.path.replacen("/v1/", "", 1);
        let route = format!(
            "/openai/deployments/{}/{}",
            deployment,
            operation.trim_start_matches('/')
        );
        let url = azure_url(channel, &route)?;

        let upstream = send(ctx, url, api_key_headers(ctx, channel)?, &body).await?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelType, DeploymentMapper};

    fn channel(endpoint: &str, api_version: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            name: None,
            channel_type: Some(ChannelType::AzureOpenAi),
            endpoint: endpoint.to_string(),
            api_key: Some("azure-secret".into()),
            api_version: api_version.map(str::to_string),
            deployment_mapper: DeploymentMapper::from([("gpt-4o", "prod-gpt4o")]),
            model_pricing: None,
        }
    }

    #[test]
    fn test_deployment_route_with_version() {
        let url = azure_url(
            &channel("https://res.openai.azure.com", Some("2024-06-01")),
            "/openai/deployments/prod-gpt4o/chat/completions",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://res.openai.azure.com/openai/deployments/prod-gpt4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_endpoint_path_is_kept_as_prefix() {
        let url = azure_url(
            &channel("https://gateway.example.com/azure/", None),
            "/openai/responses",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/azure/openai/responses");
    }

    #[test]
    fn test_hash_endpoint_is_verbatim() {
        let url = azure_url(
            &channel("https://custom.example.com/v2/chat#", Some("2024-06-01")),
            "/openai/deployments/prod-gpt4o/chat/completions",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://custom.example.com/v2/chat?api-version=2024-06-01"
        );
    }
}
