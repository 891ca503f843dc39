//! Canonical usage records and the normalizer that produces them from the
//! different shapes providers report.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Fresh (non-cached) input tokens.
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    /// Input tokens served from the provider's prompt cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
}

impl Usage {
    /// A usage record with known prompt and completion counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
            cached_tokens: None,
        }
    }
}

/// Maximum characters of streamed output text kept for estimation.
pub const ESTIMATE_TEXT_LIMIT: usize = 200_000;

fn count(raw: &Value, key: &str) -> Option<u64> {
    raw.get(key).and_then(Value::as_u64)
}

fn cached_count(raw: &Value) -> Option<u64> {
    ["input_tokens_details", "prompt_tokens_details"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(|d| count(d, "cached_tokens")))
}

/// Normalize any of the supported usage shapes.
///
/// Accepts `prompt_tokens`/`completion_tokens`, `input_tokens`/`output_tokens`,
/// and `*_tokens_details.cached_tokens`. Cached tokens are subtracted from the
/// raw input count. Returns `None` when the object carries no token counts.
pub fn normalize(raw: &Value) -> Option<Usage> {
    if !raw.is_object() {
        return None;
    }

    let raw_input = count(raw, "prompt_tokens").or_else(|| count(raw, "input_tokens"));
    let completion = count(raw, "completion_tokens").or_else(|| count(raw, "output_tokens"));
    let provider_total = count(raw, "total_tokens");

    if raw_input.is_none() && completion.is_none() && provider_total.is_none() {
        return None;
    }

    let cached = cached_count(raw).filter(|c| *c > 0);
    let prompt = raw_input.map(|input| input.saturating_sub(cached.unwrap_or(0)));

    let total = match (prompt, completion) {
        (Some(p), Some(c)) => Some(p + cached.unwrap_or(0) + c),
        _ => provider_total,
    };

    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        cached_tokens: cached,
    })
}

/// Usage from a full response object: its `usage` member when present,
/// otherwise counts placed directly on the object.
pub fn extract_from_response(response: &Value) -> Option<Usage> {
    match response.get("usage") {
        Some(usage) if !usage.is_null() => normalize(usage),
        _ => normalize(response),
    }
}

/// Rough token count: one token per four bytes of UTF-8, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate usage from payload sizes when the provider reported none.
///
/// The prompt side is the serialized request; the completion side is the
/// streamed output text when given, else the serialized response.
pub fn estimate_usage(
    request: Option<&Value>,
    response: Option<&Value>,
    streamed_text: Option<&str>,
) -> Option<Usage> {
    let prompt_text = request.map(|v| v.to_string()).unwrap_or_default();
    let completion_text = match streamed_text.filter(|t| !t.is_empty()) {
        Some(text) => text.to_string(),
        None => response.map(|v| v.to_string()).unwrap_or_default(),
    };

    let prompt = estimate_tokens(&prompt_text);
    let completion = estimate_tokens(&completion_text);
    if prompt == 0 && completion == 0 {
        return None;
    }
    Some(Usage::new(prompt, completion))
}
