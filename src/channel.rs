//! Channel, token and pricing records shared by the router, the adapters
//! and the quota accountant.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ApiKey;

/// Upstream protocol family of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelType {
    OpenAi,
    AzureOpenAi,
    Claude,
    ClaudeToOpenAi,
    OpenAiResponses,
    AzureOpenAiResponses,
    /// A type tag this build does not know. Kept so the router can reject
    /// it with a proper error instead of failing to load the channel.
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::OpenAi => "openai",
            ChannelType::AzureOpenAi => "azure-openai",
            ChannelType::Claude => "claude",
            ChannelType::ClaudeToOpenAi => "claude-to-openai",
            ChannelType::OpenAiResponses => "openai-responses",
            ChannelType::AzureOpenAiResponses => "azure-openai-responses",
            ChannelType::Other(tag) => tag,
        }
    }

    /// Whether the channel can serve `/v1/responses`.
    pub fn is_responses(&self) -> bool {
        matches!(
            self,
            ChannelType::OpenAiResponses | ChannelType::AzureOpenAiResponses
        )
    }
}

impl From<&str> for ChannelType {
    fn from(tag: &str) -> Self {
        match tag {
            "openai" => ChannelType::OpenAi,
            "azure-openai" => ChannelType::AzureOpenAi,
            "claude" => ChannelType::Claude,
            "claude-to-openai" => ChannelType::ClaudeToOpenAi,
            "openai-responses" => ChannelType::OpenAiResponses,
            "azure-openai-responses" => ChannelType::AzureOpenAiResponses,
            other => ChannelType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChannelType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ChannelType::from(s.as_str()))
    }
}

/// Ordered mapping from requested-model pattern to deployment name.
///
/// Entry order is the order the patterns appear in the source document and
/// decides which wildcard wins when several match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentMapper(Vec<(String, String)>);

impl DeploymentMapper {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self(entries)
    }

    pub fn get(&self, pattern: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| p == pattern)
            .map(|(_, d)| d.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(p, _)| p.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for DeploymentMapper {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self(
            entries
                .iter()
                .map(|(p, d)| (p.to_string(), d.to_string()))
                .collect(),
        )
    }
}

impl Serialize for DeploymentMapper {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (pattern, deployment) in &self.0 {
            map.serialize_entry(pattern, deployment)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeploymentMapper {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapperVisitor;

        impl<'de> Visitor<'de> for MapperVisitor {
            type Value = DeploymentMapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of model pattern to deployment name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, String)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((pattern, deployment)) = access.next_entry::<String, String>()? {
                    // Later duplicates replace earlier ones but keep the first position.
                    match entries.iter_mut().find(|(p, _)| *p == pattern) {
                        Some(existing) => existing.1 = deployment,
                        None => entries.push((pattern, deployment)),
                    }
                }
                Ok(DeploymentMapper(entries))
            }
        }

        deserializer.deserialize_map(MapperVisitor)
    }
}

/// Price per token, in quota units (1,000,000 units = $1.00).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<f64>,
}

/// Global pricing table keyed by requested model name.
pub type PricingTable = HashMap<String, ModelPricing>;

/// Configuration of one upstream provider connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub channel_type: Option<ChannelType>,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub deployment_mapper: DeploymentMapper,
    #[serde(default)]
    pub model_pricing: Option<HashMap<String, ModelPricing>>,
}

impl ChannelConfig {
    /// JSON form persisted by the store. Unlike `Serialize` on `ApiKey`,
    /// this writes the real secret. The mapper is written in its own order.
    pub fn to_record_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&ChannelRecord {
            name: self.name.as_deref(),
            channel_type: self.channel_type.as_ref(),
            endpoint: &self.endpoint,
            api_key: self.secret(),
            api_version: self.api_version.as_deref(),
            deployment_mapper: &self.deployment_mapper,
            model_pricing: self.model_pricing.as_ref(),
        })
    }

    /// The channel secret, if one is configured.
    pub fn secret(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }
}

#[derive(Serialize)]
struct ChannelRecord<'a> {
    name: Option<&'a str>,
    #[serde(rename = "type")]
    channel_type: Option<&'a ChannelType>,
    endpoint: &'a str,
    api_key: Option<&'a str>,
    api_version: Option<&'a str>,
    deployment_mapper: &'a DeploymentMapper,
    model_pricing: Option<&'a HashMap<String, ModelPricing>>,
}

/// A channel together with its store key.
#[derive(Debug, Clone)]
pub struct Channel {
    pub key: String,
    pub config: ChannelConfig,
}

/// A caller-facing credential with its spending quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub channel_keys: Vec<String>,
    pub total_quota: f64,
    #[serde(default)]
    pub usage: f64,
}

impl Token {
    pub fn is_exhausted(&self) -> bool {
        self.usage >= self.total_quota
    }

    /// Channel keys this token may use, or `None` for every channel.
    pub fn channel_scope(&self) -> Option<&[String]> {
        if self.channel_keys.is_empty() {
            None
        } else {
            Some(&self.channel_keys)
        }
    }
}
