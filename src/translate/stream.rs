//! OpenAI chat-completion SSE stream → Claude Messages SSE stream.

use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::response::{content_text, map_finish_reason};
use crate::proxy::stream::{data_payload, SseLineBuffer};
use crate::usage::{self, Usage};

/// Incremental translator from OpenAI chunks to Claude events.
///
/// Feed raw upstream bytes to [`push`](Self::push) and call
/// [`finish`](Self::finish) at end of stream. Both return the Claude events
/// ready to forward. After `message_stop` has been emitted nothing more is
/// produced.
#[derive(Default)]
pub struct ClaudeStreamTransformer {
    lines: SseLineBuffer,
    started: bool,
    stopped: bool,
    message_id: String,
    model: String,
    text_block: Option<usize>,
    /// OpenAI tool-call index → Claude content index.
    tool_blocks: HashMap<u64, usize>,
    open_blocks: Vec<usize>,
    next_index: usize,
    stop_reason: Option<&'static str>,
    output_tokens: u64,
    usage: Option<Usage>,
}

impl ClaudeStreamTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last usage seen on any chunk.
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = String::new();
        for line in self.lines.push(chunk) {
            self.process_line(&line, &mut out);
        }
        Bytes::from(out)
    }

    /// Flush the partial line and close the message if it is still open.
    pub fn finish(&mut self) -> Bytes {
        let mut out = String::new();
        if let Some(line) = self.lines.finish() {
            self.process_line(&line, &mut out);
        }
        self.finish_message(None, &mut out);
        Bytes::from(out)
    }

    fn emit(out: &mut String, event: &str, data: Value) {
        out.push_str("event: ");
        out.push_str(event);
        out.push_str("\ndata: ");
        out.push_str(&data.to_string());
        out.push_str("\n\n");
    }

    fn process_line(&mut self, line: &str, out: &mut String) {
        if self.stopped {
            // keep collecting usage that trails the finish event
            if let Some(chunk) = data_payload(line).and_then(|d| serde_json::from_str::<Value>(d).ok()) {
                self.capture_usage(&chunk);
            }
            return;
        }

        let Some(data) = data_payload(line) else {
            return;
        };
        if data == "[DONE]" {
            self.finish_message(None, out);
            return;
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable upstream chunk");
                return;
            }
        };

        self.capture_usage(&chunk);

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return;
        };
        let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

        let text = delta.get("content").map(content_text).unwrap_or_default();
        let tool_calls = delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .filter(|calls| !calls.is_empty());

        if !self.started
            && (delta.get("role").and_then(Value::as_str) == Some("assistant")
                || !text.is_empty()
                || tool_calls.is_some())
        {
            self.start_message(Some(&chunk), out);
        }

        if !text.is_empty() {
            let index = self.ensure_text_block(out);
            Self::emit(
                out,
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": {"type": "text_delta", "text": text},
                }),
            );
        }

        for call in tool_calls.into_iter().flatten() {
            let tool_index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let index = self.ensure_tool_block(tool_index, id, name, out);

            if let Some(args) = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
            {
                Self::emit(
                    out,
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "input_json_delta", "partial_json": args},
                    }),
                );
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_message(Some(reason), out);
        }
    }

    fn capture_usage(&mut self, chunk: &Value) {
        if let Some(usage) = chunk
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(usage::normalize)
        {
            if let Some(completion) = usage.completion_tokens {
                self.output_tokens = completion;
            }
            self.usage = Some(usage);
        }
    }

    fn start_message(&mut self, chunk: Option<&Value>, out: &mut String) {
        if self.started {
            return;
        }
        if let Some(chunk) = chunk {
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.message_id = id.to_string();
            }
            if let Some(model) = chunk.get("model").and_then(Value::as_str) {
                self.model = model.to_string();
            }
        }
        self.started = true;
        Self::emit(
            out,
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        );
    }

    fn start_block(&mut self, index: usize, block: Value, out: &mut String) {
        if !self.open_blocks.contains(&index) {
            self.open_blocks.push(index);
        }
        Self::emit(
            out,
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": block,
            }),
        );
    }

    fn ensure_text_block(&mut self, out: &mut String) -> usize {
        if let Some(index) = self.text_block {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.text_block = Some(index);
        self.start_block(index, json!({"type": "text", "text": ""}), out);
        index
    }

    fn ensure_tool_block(&mut self, tool_index: u64, id: &str, name: &str, out: &mut String) -> usize {
        if let Some(&index) = self.tool_blocks.get(&tool_index) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.tool_blocks.insert(tool_index, index);
        self.start_block(
            index,
            json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
            out,
        );
        index
    }

    /// Close open blocks and the message. Runs once; later calls are no-ops.
    fn finish_message(&mut self, finish_reason: Option<&str>, out: &mut String) {
        if self.stopped {
            return;
        }
        self.start_message(None, out);
        if finish_reason.is_some() {
            self.stop_reason = map_finish_reason(finish_reason);
        }

        for index in std::mem::take(&mut self.open_blocks) {
            Self::emit(
                out,
                "content_block_stop",
                json!({"type": "content_block_stop", "index": index}),
            );
        }
        Self::emit(
            out,
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": self.stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.output_tokens},
            }),
        );
        Self::emit(out, "message_stop", json!({"type": "message_stop"}));
        self.stopped = true;
    }
}
