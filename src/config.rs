//! Configuration parsing and validation for llmgate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;

use crate::channel::{Channel, ChannelConfig, ChannelType, DeploymentMapper, ModelPricing, PricingTable, Token};

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub channels: Vec<Channel>,
    pub tokens: Vec<TokenConfig>,
    pub pricing: PricingTable,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound, in seconds, for draining usage tasks at shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./llmgate.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a channel's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// A caller token declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub channel_keys: Vec<String>,
    pub total_quota: f64,
}

impl TokenConfig {
    /// A fresh token record with no usage yet.
    pub fn to_token(&self) -> Token {
        Token {
            key: self.key.clone(),
            name: self.name.clone(),
            channel_keys: self.channel_keys.clone(),
            total_quota: self.total_quota,
            usage: 0.0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level for the llmgate target
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for channel '{channel}': {message}")]
    EnvVar {
        var: String,
        channel: String,
        message: String,
    },
}

/// Raw channel config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawChannelConfig {
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    channel_type: Option<ChannelType>,
    endpoint: String,
    api_key: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    deployment_mapper: DeploymentMapper,
    #[serde(default)]
    model_pricing: Option<std::collections::HashMap<String, ModelPricing>>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    channels: Vec<RawChannelConfig>,
    #[serde(default)]
    tokens: Vec<TokenConfig>,
    #[serde(default)]
    pricing: PricingTable,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, channel_key: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            channel: channel_key.to_string(),
            message: "Unclosed '${' in config value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                channel: channel_key.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            channel: channel_key.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in channel '{}')",
                var_name, channel_key
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, channel_key: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, channel_key, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a channel.
///
/// - "azure-east" -> "LLMGATE_AZURE_EAST_API_KEY"
/// - "claude main" -> "LLMGATE_CLAUDE_MAIN_API_KEY"
pub fn convention_env_var_name(channel_key: &str) -> String {
    let upper_snake = channel_key.to_uppercase().replace(['-', ' ', '.'], "_");
    format!("LLMGATE_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(channel_key: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(channel_key);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Parse configuration from a TOML string with environment variable expansion.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, _) = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each channel:
    /// - `api_key` containing `${VAR}` is expanded from the environment
    /// - a literal `api_key` is wrapped directly
    /// - a missing `api_key` falls back to `LLMGATE_<KEY>_API_KEY`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut channels = Vec::with_capacity(raw.channels.len());
        let mut key_sources = Vec::with_capacity(raw.channels.len());

        for rc in raw.channels {
            let (api_key, source) = match rc.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rc.key)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rc.key) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rc.key.clone(), source));

            channels.push(Channel {
                key: rc.key,
                config: ChannelConfig {
                    name: rc.name,
                    channel_type: rc.channel_type,
                    endpoint: rc.endpoint,
                    api_key,
                    api_version: rc.api_version,
                    deployment_mapper: rc.deployment_mapper,
                    model_pricing: rc.model_pricing,
                },
            });
        }

        let config = Config {
            server: raw.server,
            database: raw.database,
            channels,
            tokens: raw.tokens,
            pricing: raw.pricing,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-channel key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            tracing::warn!("No channels configured - proxy will reject all requests");
        }

        let mut channel_keys = HashSet::new();
        for channel in &self.channels {
            if !channel_keys.insert(channel.key.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate channel key '{}'",
                    channel.key
                )));
            }
            if channel.config.endpoint.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Channel '{}' has empty endpoint",
                    channel.key
                )));
            }
            let endpoint = channel.config.endpoint.trim_end_matches('#');
            if let Err(e) = reqwest::Url::parse(endpoint) {
                return Err(ConfigError::Validation(format!(
                    "Channel '{}' has invalid endpoint '{}': {}",
                    channel.key, channel.config.endpoint, e
                )));
            }
            if let Some(ChannelType::Other(tag)) = &channel.config.channel_type {
                tracing::warn!(channel = %channel.key, r#type = %tag, "Unknown channel type; requests routed to it will be rejected");
            }
        }

        let mut token_keys = HashSet::new();
        for token in &self.tokens {
            if !token_keys.insert(token.key.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate token key for token '{}'",
                    token.name
                )));
            }
        }

        Ok(())
    }

    /// Get database config with defaults.
    pub fn database(&self) -> Option<DatabaseConfig> {
        self.database.clone()
    }
}
