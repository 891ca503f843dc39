//! Integration tests for Claude Messages callers served by an
//! OpenAI-compatible upstream.
//!
//! The mock upstream speaks chat completions; the caller must see a
//! Claude-shaped answer and be billed under the model it asked for.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llmgate::channel::{Channel, ChannelConfig, ChannelType, DeploymentMapper, ModelPricing, Token};
use llmgate::proxy::{create_router, AppState};
use llmgate::storage::{ConfigStore, MemoryStore};

const CALLER_KEY: &str = "sk-claude-caller";

fn setup(endpoint: &str) -> (axum::Router, AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.put_token(Token {
        key: CALLER_KEY.to_string(),
        name: "translator".to_string(),
        channel_keys: vec![],
        total_quota: 10_000.0,
        usage: 0.0,
    });
    store.put_channel(Channel {
        key: "compat".to_string(),
        config: ChannelConfig {
            name: Some("OpenAI-compatible".to_string()),
            channel_type: Some(ChannelType::ClaudeToOpenAi),
            endpoint: endpoint.to_string(),
            api_key: Some("sk-compat".into()),
            api_version: None,
            deployment_mapper: DeploymentMapper::from([("claude-*", "qwen-max")]),
            model_pricing: None,
        },
    });
    // Priced under the caller's model name, not the deployment.
    store.put_pricing(
        "claude-3-haiku",
        ModelPricing {
            input: 1.0,
            output: 2.0,
            cache: None,
        },
    );

    let state = AppState::new(store.clone(), reqwest::Client::new());
    (create_router(state.clone()), state, store)
}

fn messages_request(body: Value) -> Request<Body> {
    Request::post("/v1/messages")
        .header("x-api-key", CALLER_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Parse `event:`/`data:` pairs out of a Claude SSE body.
fn parse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut name = String::new();
            let mut data = Value::Null;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    name = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(rest).expect("event data is JSON");
                }
            }
            (name, data)
        })
        .collect()
}

#[tokio::test]
async fn test_streaming_translation_and_billing() {
    let chunks = [
        json!({"id": "chatcmpl-9", "model": "qwen-max", "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
        json!({"id": "chatcmpl-9", "model": "qwen-max", "choices": [{"index": 0, "delta": {"content": "Hi"}}]}),
        json!({"id": "chatcmpl-9", "model": "qwen-max", "choices": [{"index": 0, "delta": {"content": " there"}}]}),
        json!({"id": "chatcmpl-9", "model": "qwen-max", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
        json!({"id": "chatcmpl-9", "model": "qwen-max", "choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}}),
    ];
    let mut sse = String::new();
    for chunk in &chunks {
        sse.push_str(&format!("data: {}\n\n", chunk));
    }
    sse.push_str("data: [DONE]\n\n");

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-compat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, state, store) = setup(&upstream.uri());

    let response = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 256,
            "stream": true,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Say hi"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let events = parse_events(&body_text(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names.first(), Some(&"message_start"));
    assert_eq!(names.last(), Some(&"message_stop"));
    assert_eq!(names.iter().filter(|n| **n == "message_stop").count(), 1);

    let text: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| data.pointer("/delta/text").and_then(Value::as_str))
        .collect();
    assert_eq!(text, "Hi there");

    let delta = events
        .iter()
        .find(|(name, _)| name == "message_delta")
        .map(|(_, data)| data.clone())
        .expect("message_delta present");
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");

    assert!(state.tasks.drain(Duration::from_secs(5)).await);
    let token = store.get_token(CALLER_KEY).await.unwrap().unwrap();
    // 9 × 1 + 2 × 2
    assert_eq!(token.usage, 13.0);

    let received = upstream.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["model"], "qwen-max");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["stream_options"]["include_usage"], true);
    assert_eq!(sent["messages"][0], json!({"role": "system", "content": "Be brief."}));
    assert_eq!(sent["messages"][1]["role"], "user");
    assert_eq!(sent["max_tokens"], 256);
}

#[tokio::test]
async fn test_buffered_translation() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "model": "qwen-max",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 30, "completion_tokens": 5, "total_tokens": 35}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, _, store) = setup(&upstream.uri());

    let response = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "Weather in Paris?"}],
            "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["content"][0], json!({"type": "text", "text": "Checking."}));
    assert_eq!(body["content"][1]["type"], "tool_use");
    assert_eq!(body["content"][1]["name"], "get_weather");
    assert_eq!(body["content"][1]["input"], json!({"city": "Paris"}));
    assert_eq!(body["usage"], json!({"input_tokens": 30, "output_tokens": 5}));

    let token = store.get_token(CALLER_KEY).await.unwrap().unwrap();
    assert_eq!(token.usage, 40.0);
}

#[tokio::test]
async fn test_buffered_translation_with_null_tool_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-3",
            "object": "chat.completion",
            "model": "qwen-max",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Sunny.", "tool_calls": null},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, _, store) = setup(&upstream.uri());

    let response = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "Weather?"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["content"], json!([{"type": "text", "text": "Sunny."}]));
    assert_eq!(body["stop_reason"], "end_turn");

    let token = store.get_token(CALLER_KEY).await.unwrap().unwrap();
    // 10 × 1 + 2 × 2
    assert_eq!(token.usage, 14.0);
}

#[tokio::test]
async fn test_upstream_error_relayed_untranslated() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .mount(&upstream)
        .await;

    let (app, _, store) = setup(&upstream.uri());

    let response = app
        .oneshot(messages_request(json!({
            "model": "claude-3-haiku",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["message"], "overloaded");

    let token = store.get_token(CALLER_KEY).await.unwrap().unwrap();
    assert_eq!(token.usage, 0.0);
}

#[tokio::test]
async fn test_invalid_claude_body_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let (app, _, _) = setup(&upstream.uri());

    let response = app
        .oneshot(messages_request(json!({"model": "claude-3-haiku", "messages": "not a list"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.starts_with("Invalid Claude request"));
}
