//! Claude Messages request ⇄ OpenAI Chat Completions request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Claude wire format ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub messages: Vec<ClaudeMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ClaudeToolChoice>,
}

/// `system` may be a plain string or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<Value>),
}

impl SystemPrompt {
    fn text(&self) -> Option<String> {
        let text = match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect(),
        };
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
    },
    /// Images, documents, thinking and anything newer: not translated.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl ToolResultContent {
    /// Concatenated text of the result.
    pub fn text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeToolChoice {
    Auto,
    Any,
    Tool { name: String },
    None,
}

// ── OpenAI wire format ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl ChatContent {
    pub fn text(&self) -> String {
        match self {
            ChatContent::Text(text) => text.clone(),
            ChatContent::Parts(parts) => parts.iter().map(|p| p.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ContentPart {
    fn text(text: String) -> Self {
        Self {
            kind: "text".to_string(),
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

fn function_kind() -> String {
    "function".to_string()
}

// ── Claude → OpenAI ─────────────────────────────────────────────────────

fn map_tool_choice(choice: &ClaudeToolChoice) -> Value {
    match choice {
        ClaudeToolChoice::Auto => Value::from("auto"),
        ClaudeToolChoice::Any => Value::from("required"),
        ClaudeToolChoice::None => Value::from("none"),
        ClaudeToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

/// Flatten one Claude message into OpenAI messages, appended to `out`.
///
/// `tool_result` blocks become `tool` messages ahead of the rest of the
/// turn. A turn left with neither text nor tool calls is dropped.
fn push_message(message: &ClaudeMessage, out: &mut Vec<ChatMessage>) {
    let mut converted = ChatMessage {
        role: message.role.clone(),
        ..Default::default()
    };

    match &message.content {
        MessageContent::Text(text) => converted.content = Some(ChatContent::Text(text.clone())),
        MessageContent::Blocks(blocks) => {
            let mut texts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => texts.push(text.clone()),
                    ContentBlock::ToolUse { id, name, input } => {
                        let input = if input.is_null() {
                            Value::Object(Default::default())
                        } else {
                            input.clone()
                        };
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            kind: function_kind(),
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        });
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => out.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(ChatContent::Text(
                            content.as_ref().map(ToolResultContent::text).unwrap_or_default(),
                        )),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id.clone()),
                    }),
                    ContentBlock::Unsupported => {}
                }
            }

            if !tool_calls.is_empty() {
                converted.tool_calls = Some(tool_calls);
            }
            converted.content = match texts.len() {
                0 => None,
                1 => texts.pop().map(ChatContent::Text),
                _ => Some(ChatContent::Parts(
                    texts.into_iter().map(ContentPart::text).collect(),
                )),
            };
        }
    }

    if converted.content.is_some() || converted.tool_calls.is_some() {
        out.push(converted);
    }
}

/// Translate a Claude Messages request into a Chat Completions request.
pub fn claude_to_openai(request: &ClaudeRequest) -> ChatRequest {
    let mut messages = Vec::new();
    if let Some(system) = request.system.as_ref().and_then(SystemPrompt::text) {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system)),
            ..Default::default()
        });
    }
    for message in &request.messages {
        push_message(message, &mut messages);
    }

    ChatRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone().filter(|s| !s.is_empty()),
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| ChatTool {
                    kind: function_kind(),
                    function: FunctionDef {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(map_tool_choice),
        stream_options: None,
    }
}

// ── OpenAI → Claude ─────────────────────────────────────────────────────

/// Parse a tool call's JSON arguments back into a structured input.
pub fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn unmap_tool_choice(choice: &Value) -> Option<ClaudeToolChoice> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(ClaudeToolChoice::Auto),
            "required" => Some(ClaudeToolChoice::Any),
            "none" => Some(ClaudeToolChoice::None),
            _ => None,
        },
        other => other
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| ClaudeToolChoice::Tool {
                name: name.to_string(),
            }),
    }
}

/// Translate a Chat Completions request into a Claude Messages request.
///
/// Consecutive `tool` messages and the user message that follows them are
/// merged into a single user turn, the inverse of [`claude_to_openai`].
pub fn openai_to_claude(request: &ChatRequest) -> ClaudeRequest {
    let mut system = Vec::new();
    let mut messages: Vec<ClaudeMessage> = Vec::new();
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" => {
                if let Some(content) = &message.content {
                    system.push(content.text());
                }
            }
            "tool" => pending_results.push(ContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message
                    .content
                    .as_ref()
                    .map(|c| ToolResultContent::Text(c.text())),
            }),
            role => {
                let mut blocks = std::mem::take(&mut pending_results);
                if role != "user" && !blocks.is_empty() {
                    messages.push(ClaudeMessage {
                        role: "user".to_string(),
                        content: MessageContent::Blocks(std::mem::take(&mut blocks)),
                    });
                }
                match &message.content {
                    Some(ChatContent::Text(text)) => blocks.push(ContentBlock::Text { text: text.clone() }),
                    Some(ChatContent::Parts(parts)) => blocks.extend(
                        parts
                            .iter()
                            .map(|p| ContentBlock::Text { text: p.text.clone() }),
                    ),
                    None => {}
                }
                for call in message.tool_calls.iter().flatten() {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input: parse_arguments(&call.function.arguments),
                    });
                }
                let content = match blocks.as_slice() {
                    [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
                    _ => MessageContent::Blocks(blocks),
                };
                messages.push(ClaudeMessage {
                    role: role.to_string(),
                    content,
                });
            }
        }
    }

    if !pending_results.is_empty() {
        messages.push(ClaudeMessage {
            role: "user".to_string(),
            content: MessageContent::Blocks(pending_results),
        });
    }

    ClaudeRequest {
        model: request.model.clone(),
        system: (!system.is_empty()).then(|| SystemPrompt::Text(system.join("\n"))),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        stop_sequences: request.stop.clone(),
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| ClaudeTool {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    input_schema: tool.function.parameters.clone(),
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().and_then(unmap_tool_choice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> ClaudeRequest {
        serde_json::from_value(value).unwrap()
    }

    fn tool_conversation() -> ClaudeRequest {
        parse(json!({
            "model": "gpt-4o",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "You are "}, {"type": "text", "text": "helpful."}],
            "tools": [{
                "name": "get_weather",
                "description": "Current weather",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "messages": [
                {"role": "user", "content": "Weather in Paris?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {"city": "Paris", "units": ["c", "f"]}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01", "content": [{"type": "text", "text": "Sunny, 22C"}]}
                ]}
            ]
        }))
    }

    #[test]
    fn test_system_and_tools_translate() {
        let chat = claude_to_openai(&tool_conversation());
        let value = serde_json::to_value(&chat).unwrap();

        assert_eq!(value["messages"][0], json!({"role": "system", "content": "You are helpful."}));
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(
            value["tools"][0]["function"]["parameters"]["properties"]["city"]["type"],
            "string"
        );
        assert_eq!(value["max_tokens"], 1024);
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_tool_use_and_result_messages() {
        let chat = claude_to_openai(&tool_conversation());
        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        // the user turn holding only a tool_result collapses into the tool message
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);

        let assistant = &chat.messages[2];
        assert_eq!(assistant.content, Some(ChatContent::Text("Let me check.".into())));
        let call = &assistant.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "toolu_01");
        assert_eq!(call.kind, "function");
        assert_eq!(
            parse_arguments(&call.function.arguments),
            json!({"city": "Paris", "units": ["c", "f"]})
        );

        let tool = &chat.messages[3];
        assert_eq!(tool.tool_call_id.as_deref(), Some("toolu_01"));
        assert_eq!(tool.content, Some(ChatContent::Text("Sunny, 22C".into())));
    }

    #[test]
    fn test_tool_round_trip_is_lossless() {
        let original = tool_conversation();
        let back = openai_to_claude(&claude_to_openai(&original));

        assert_eq!(back.messages.len(), 3);

        let MessageContent::Blocks(assistant) = &back.messages[1].content else {
            panic!("assistant turn should keep its blocks");
        };
        let MessageContent::Blocks(original_assistant) = &original.messages[1].content else {
            unreachable!()
        };
        assert_eq!(assistant, original_assistant);

        let MessageContent::Blocks(results) = &back.messages[2].content else {
            panic!("tool results should come back as blocks");
        };
        assert_eq!(back.messages[2].role, "user");
        match &results[0] {
            ContentBlock::ToolResult { tool_use_id, content } => {
                assert_eq!(tool_use_id, "toolu_01");
                assert_eq!(content.as_ref().unwrap().text(), "Sunny, 22C");
            }
            other => panic!("unexpected block {:?}", other),
        }

        let tools = back.tools.unwrap();
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].input_schema, original.tools.unwrap()[0].input_schema);
    }

    #[test]
    fn test_tool_result_precedes_rest_of_turn() {
        let request = parse(json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_result", "tool_use_id": "t1", "content": "42"}
            ]}]
        }));
        let chat = claude_to_openai(&request);
        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["tool", "user"]);
    }

    #[test]
    fn test_multiple_text_blocks_become_parts() {
        let request = parse(json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "source": {"type": "base64", "data": "..."}},
                {"type": "text", "text": "second"}
            ]}]
        }));
        let value = serde_json::to_value(claude_to_openai(&request)).unwrap();
        assert_eq!(
            value["messages"][0]["content"],
            json!([{"type": "text", "text": "first"}, {"type": "text", "text": "second"}])
        );
    }

    #[test]
    fn test_empty_messages_dropped() {
        let request = parse(json!({
            "messages": [
                {"role": "user", "content": []},
                {"role": "user", "content": "hello"}
            ]
        }));
        let chat = claude_to_openai(&request);
        assert_eq!(chat.messages.len(), 1);
    }

    #[test]
    fn test_stop_sequences_and_sampling() {
        let request = parse(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "stop_sequences": ["END"],
            "temperature": 0.2,
            "top_p": 0.9,
            "stream": true
        }));
        let chat = claude_to_openai(&request);
        assert_eq!(chat.stop, Some(vec!["END".to_string()]));
        assert_eq!(chat.temperature, Some(0.2));
        assert_eq!(chat.top_p, Some(0.9));
        assert_eq!(chat.stream, Some(true));

        let empty = parse(json!({"messages": [], "stop_sequences": []}));
        assert!(claude_to_openai(&empty).stop.is_none());
    }

    #[test]
    fn test_tool_choice_mapping() {
        let cases = [
            (json!({"type": "auto"}), json!("auto")),
            (json!({"type": "any"}), json!("required")),
            (json!({"type": "none"}), json!("none")),
            (
                json!({"type": "tool", "name": "get_weather"}),
                json!({"type": "function", "function": {"name": "get_weather"}}),
            ),
        ];
        for (claude, openai) in cases {
            let request = parse(json!({"messages": [], "tool_choice": claude}));
            let chat = claude_to_openai(&request);
            assert_eq!(chat.tool_choice.as_ref(), Some(&openai));
            assert_eq!(openai_to_claude(&chat).tool_choice, request.tool_choice);
        }
    }
}
