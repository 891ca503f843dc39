//! OpenAI Chat Completions response → Claude Messages response.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::request::{parse_arguments, ContentBlock};

/// Map an OpenAI `finish_reason` to a Claude `stop_reason`.
pub fn map_finish_reason(reason: Option<&str>) -> Option<&'static str> {
    match reason? {
        "stop" => Some("end_turn"),
        "length" => Some("max_tokens"),
        "tool_calls" => Some("tool_use"),
        _ => None,
    }
}

/// Compatible servers write `null` where OpenAI omits the field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseMessage {
    /// A string, an array of content parts, or null.
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ResponseFunction>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseFunction {
    #[serde(default)]
    pub name: Option<String>,
    /// Normally a JSON string; some compatible servers send an object.
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ClaudeResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<&'static str>,
    pub stop_sequence: Option<String>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Serialize)]
pub struct ClaudeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Text of a message `content` that may be a string or a part array.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn usage_count(usage: Option<&Value>, keys: [&str; 2]) -> u64 {
    usage
        .and_then(|u| keys.iter().find_map(|k| u.get(*k).and_then(Value::as_u64)))
        .unwrap_or(0)
}

/// Translate a completed chat response into a Claude message.
pub fn openai_to_claude_response(completion: &ChatCompletion) -> ClaudeResponse {
    let choice = completion.choices.first();
    let message = choice.and_then(|c| c.message.as_ref());

    let mut content = Vec::new();
    let text = message
        .and_then(|m| m.content.as_ref())
        .map(content_text)
        .unwrap_or_default();
    if !text.is_empty() {
        content.push(ContentBlock::Text { text });
    }

    for call in message.map(|m| m.tool_calls.as_slice()).unwrap_or_default() {
        let function = call.function.as_ref();
        let input = match function.and_then(|f| f.arguments.as_ref()) {
            Some(Value::String(args)) => parse_arguments(args),
            Some(args @ Value::Object(_)) => args.clone(),
            _ => Value::Object(Default::default()),
        };
        content.push(ContentBlock::ToolUse {
            id: call.id.clone().unwrap_or_default(),
            name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
            input,
        });
    }

    let usage = completion.usage.as_ref();
    ClaudeResponse {
        id: completion.id.clone().unwrap_or_default(),
        kind: "message",
        role: "assistant",
        model: completion.model.clone().unwrap_or_default(),
        content,
        stop_reason: map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref())),
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: usage_count(usage, ["prompt_tokens", "input_tokens"]),
            output_tokens: usage_count(usage, ["completion_tokens", "output_tokens"]),
        },
    }
}
