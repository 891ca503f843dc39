//! SSE stream observation module.
//!
//! [`SseLineBuffer`] reassembles complete lines across TCP chunk boundaries.
//! A [`UsageObserver`] turns the `data:` payloads of one provider's event
//! stream into a canonical [`Usage`], and [`observe_usage`] drives an
//! observer over a byte stream and saves the result at most once.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;

use crate::quota::UsageSink;
use crate::usage::{self, Usage, ESTIMATE_TEXT_LIMIT};

/// Longest line kept while waiting for its newline. Past this the partial
/// line is dropped.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line reassembly over a chunked byte stream.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, without the
    /// line terminator. `\r\n` and `\n` are both accepted.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, dropping partial line"
            );
            self.buffer.clear();
        }

        lines
    }

    /// Return whatever is left as a final, unterminated line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// The payload of a `data:` line, with or without a space after the colon.
/// Returns `None` for other SSE fields, comments and blank lines.
pub fn data_payload(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("data:")
        .map(str::trim)
        .filter(|data| !data.is_empty())
}

/// Extracts usage from one provider's event stream.
pub trait UsageObserver: Send {
    /// Inspect one `data:` payload. Returning `Some` ends observation: that
    /// usage is saved and no further payloads are consulted.
    fn on_data(&mut self, data: &str) -> Option<Usage>;

    /// Called at end of stream when nothing has been saved yet.
    fn on_end(&mut self) -> Option<Usage> {
        None
    }
}

/// Chat-completions streams (OpenAI and Azure): usage arrives on a trailing
/// chunk once `stream_options.include_usage` is set.
#[derive(Default)]
pub struct ChatUsageObserver;

impl UsageObserver for ChatUsageObserver {
    fn on_data(&mut self, data: &str) -> Option<Usage> {
        if data == "[DONE]" {
            return None;
        }
        let chunk: Value = serde_json::from_str(data).ok()?;
        chunk
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(usage::normalize)
    }
}

/// Native Claude streams.
///
/// A `message_complete` event carries the full usage and wins. Otherwise
/// input tokens come from `message_start`, output tokens from the latest
/// `message_delta`, and the total is saved on `message_stop`.
#[derive(Default)]
pub struct ClaudeUsageObserver {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl ClaudeUsageObserver {
    fn accumulate(&mut self, usage: &Value) {
        if let Some(input) = usage.get("input_tokens").and_then(Value::as_u64) {
            self.input_tokens = Some(input);
        }
        if let Some(output) = usage.get("output_tokens").and_then(Value::as_u64) {
            self.output_tokens = Some(output);
        }
    }

    fn accumulated(&self) -> Option<Usage> {
        if self.input_tokens.is_none() && self.output_tokens.is_none() {
            return None;
        }
        Some(Usage::new(
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
        ))
    }
}

impl UsageObserver for ClaudeUsageObserver {
    fn on_data(&mut self, data: &str) -> Option<Usage> {
        // ping
        if data == "{}" {
            return None;
        }
        let event: Value = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable Claude stream event");
                return None;
            }
        };

        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = event.pointer("/message/usage") {
                    self.accumulate(usage);
                }
                None
            }
            Some("message_delta") => {
                if let Some(usage) = event.get("usage") {
                    self.accumulate(usage);
                }
                None
            }
            Some("message_complete") => event
                .pointer("/message/usage")
                .or_else(|| event.get("usage"))
                .and_then(usage::normalize),
            Some("message_stop") => self.accumulated(),
            _ => None,
        }
    }

    fn on_end(&mut self) -> Option<Usage> {
        self.accumulated()
    }
}

/// Responses-API streams: usage sits on the `response.completed` event.
/// Without one, usage is estimated from the request and the streamed text.
pub struct ResponsesUsageObserver {
    request: Value,
    output_text: String,
}

impl ResponsesUsageObserver {
    pub fn new(request: Value) -> Self {
        Self {
            request,
            output_text: String::new(),
        }
    }
}

impl UsageObserver for ResponsesUsageObserver {
    fn on_data(&mut self, data: &str) -> Option<Usage> {
        if data == "[DONE]" {
            return None;
        }
        let event: Value = serde_json::from_str(data).ok()?;

        match event.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta") => {
                let delta = event
                    .get("delta")
                    .and_then(Value::as_str)
                    .or_else(|| event.get("text").and_then(Value::as_str))
                    .unwrap_or_default();
                if self.output_text.len() < ESTIMATE_TEXT_LIMIT {
                    self.output_text.push_str(delta);
                }
                None
            }
            Some("response.completed") => event.get("response").and_then(usage::extract_from_response),
            _ => None,
        }
    }

    fn on_end(&mut self) -> Option<Usage> {
        let estimated = usage::estimate_usage(Some(&self.request), None, Some(&self.output_text));
        if estimated.is_some() {
            tracing::debug!(?estimated, "No usage event in responses stream, using estimate");
        }
        estimated
    }
}

/// Drain `chunks` through `observer` and save the first usage it yields.
///
/// The stream is always read to its end, even after usage has been saved,
/// so the upstream connection is consumed completely.
pub async fn observe_usage<S, O>(mut chunks: S, mut observer: O, sink: Arc<dyn UsageSink>)
where
    S: Stream<Item = Bytes> + Unpin,
    O: UsageObserver,
{
    let mut lines = SseLineBuffer::new();
    let mut saved = false;

    while let Some(chunk) = chunks.next().await {
        for line in lines.push(&chunk) {
            if !saved {
                saved = observe_line(&line, &mut observer, sink.as_ref()).await;
            }
        }
    }

    if let Some(line) = lines.finish() {
        if !saved {
            saved = observe_line(&line, &mut observer, sink.as_ref()).await;
        }
    }

    if !saved {
        match observer.on_end() {
            Some(usage) => sink.save(usage).await,
            None => tracing::warn!("Stream ended without usage information"),
        }
    }
}

async fn observe_line<O: UsageObserver>(line: &str, observer: &mut O, sink: &dyn UsageSink) -> bool {
    let Some(data) = data_payload(line) else {
        return false;
    };
    match observer.on_data(data) {
        Some(usage) => {
            sink.save(usage).await;
            true
        }
        None => false,
    }
}
