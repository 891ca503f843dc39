//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{header, HeaderMap, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use super::server::{AppState, RequestId};
use crate::channel::{Channel, Token};
use crate::error::{Error, Result};
use crate::providers::ProxyContext;
use crate::quota::{mask_api_key, BillingSink};
use crate::router::{eligible_channels, list_models as mapped_models, pick, ChannelFilter, EligibleChannel};

/// `created` timestamp reported for every listed model.
const MODEL_CREATED: u64 = 1_700_000_000;

/// Caller credential: `Authorization: Bearer <key>` first, then `x-api-key`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty());

    bearer
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

/// Resolve the caller's token from the request headers.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(String, Token)> {
    let api_key = extract_api_key(headers)
        .ok_or_else(|| Error::Unauthorized("Authorization header or x-api-key not found".to_string()))?;

    match state.store.get_token(&api_key).await? {
        Some(token) => Ok((api_key, token)),
        None => {
            tracing::warn!(token = %mask_api_key(&api_key), "Rejected unknown API key");
            Err(Error::Unauthorized("Invalid API key".to_string()))
        }
    }
}

fn choose<'e, 'a>(eligible: &'e [EligibleChannel<'a>]) -> Option<&'e EligibleChannel<'a>> {
    pick(eligible, &mut rand::rng())
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    route(state, request_id, uri, headers, body, ChannelFilter::Any).await
}

/// Handle POST /v1/messages
pub async fn messages(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    route(state, request_id, uri, headers, body, ChannelFilter::Any).await
}

/// Handle POST /v1/responses
pub async fn responses(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    route(state, request_id, uri, headers, body, ChannelFilter::ResponsesOnly).await
}

/// Authenticate, pick a channel for the requested model and hand the
/// request to that channel's adapter.
///
/// Every rejection happens before the upstream is contacted.
async fn route(
    state: AppState,
    request_id: RequestId,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    filter: ChannelFilter,
) -> Result<Response> {
    let (api_key, token) = authenticate(&state, &headers).await?;
    if token.is_exhausted() {
        tracing::info!(
            request_id = %request_id.0,
            token = %mask_api_key(&api_key),
            usage = token.usage,
            total_quota = token.total_quota,
            "Quota exceeded"
        );
        return Err(Error::QuotaExceeded);
    }

    let channels = state.store.get_channels(token.channel_scope()).await?;

    let mut body: Value = serde_json::from_slice(&body)
        .map_err(|_| Error::BadRequest("Invalid JSON body".to_string()))?;
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::BadRequest("Model is required".to_string()))?;

    if channels.is_empty() {
        return Err(Error::NotFound("No available channels for this token".to_string()));
    }

    let eligible = eligible_channels(&channels, &model, filter);
    let Some(selected) = choose(&eligible) else {
        tracing::info!(request_id = %request_id.0, model = %model, "No channel maps the requested model");
        return Err(Error::BadRequest(format!(
            "Model not mapped: {}. Please configure deployment_mapper.",
            model
        )));
    };
    let channel: &Channel = selected.channel;

    if let Some(object) = body.as_object_mut() {
        object.insert("model".to_string(), Value::String(selected.deployment.clone()));
    }

    let channel_type = channel
        .config
        .channel_type
        .as_ref()
        .ok_or_else(|| Error::BadRequest("Channel type invalid".to_string()))?;
    let adapter = state
        .adapters
        .get(channel_type)
        .ok_or_else(|| Error::BadRequest("Channel type not supported".to_string()))?;

    tracing::info!(
        request_id = %request_id.0,
        model = %model,
        channel = %channel.key,
        channel_type = %channel_type,
        pattern = %selected.pattern,
        deployment = %selected.deployment,
        candidates = eligible.len(),
        stream = crate::providers::is_stream(&body),
        "Routing request"
    );

    let sink = Arc::new(BillingSink {
        accountant: state.accountant.clone(),
        api_key,
        model,
        channel_key: channel.key.clone(),
        channel: channel.config.clone(),
    });
    let ctx = ProxyContext {
        http_client: state.http_client.clone(),
        tasks: state.tasks.clone(),
        path: uri.path().to_string(),
        headers,
    };

    adapter.fetch(&ctx, &channel.config, body, sink).await
}

/// Handle GET /v1/models - models reachable by the caller's token
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let (_, token) = authenticate(&state, &headers).await?;
    let channels = state.store.get_channels(token.channel_scope()).await?;

    let data: Vec<Value> = mapped_models(&channels)
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": MODEL_CREATED,
                "owned_by": "system",
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "object": "list",
        "data": data
    })))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "llmgate"
    }))
}
