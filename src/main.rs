//! llmgate - Quota-metered LLM gateway
//!
//! Exposes OpenAI- and Claude-compatible endpoints and forwards each request
//! to one of the configured upstream channels, billing token usage against
//! the caller's quota.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmgate::config::{Config, KeySource};
use llmgate::proxy::run_server;
use llmgate::storage::{self, ConfigStore, MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(name = "llmgate")]
#[command(about = "Quota-metered gateway for OpenAI, Azure OpenAI and Claude")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured channels and their model mappings
    Channels {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Log level from the config file when it can be read, else `info`.
fn configured_level(path: &str) -> String {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<toml::Value>(&content).ok())
        .and_then(|value| {
            value
                .get("logging")
                .and_then(|l| l.get("level"))
                .and_then(|l| l.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "info".to_string())
}

fn config_path(command: &Commands) -> &str {
    match command {
        Commands::Serve { config, .. } | Commands::Check { config } | Commands::Channels { config } => {
            config
        }
    }
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (channel, source) in key_sources {
        match source {
            KeySource::None => {
                tracing::warn!(channel = %channel, "No API key available for channel")
            }
            _ => tracing::info!(channel = %channel, source = %source, "Resolved channel API key"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = configured_level(config_path(&cli.command));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("llmgate={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut config, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            let store: Arc<dyn ConfigStore> = match config.database() {
                Some(db) => {
                    tracing::info!(path = %db.path, "Opening SQLite configuration store");
                    let sqlite = SqliteStore::open(&db.path).await?;
                    storage::seed(&sqlite, &config).await?;
                    Arc::new(sqlite)
                }
                None => {
                    tracing::info!("No [database] configured, using in-memory store");
                    let memory = MemoryStore::new();
                    storage::seed(&memory, &config).await?;
                    Arc::new(memory)
                }
            };

            run_server(config, store).await
        }

        Commands::Check { config } => {
            tracing::info!(config = %config, "Checking configuration");
            let (config, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);
            println!(
                "Configuration OK: {} channel(s), {} token(s), {} priced model(s)",
                config.channels.len(),
                config.tokens.len(),
                config.pricing.len()
            );
            Ok(())
        }

        Commands::Channels { config } => {
            let (config, key_sources) = Config::from_file_with_env(&config)?;
            for (channel, (_, source)) in config.channels.iter().zip(key_sources.iter()) {
                let channel_type = channel
                    .config
                    .channel_type
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "(none)".to_string());
                let patterns: Vec<&str> = channel.config.deployment_mapper.patterns().collect();
                println!("{}", channel.key);
                println!("  type:     {}", channel_type);
                println!("  endpoint: {}", channel.config.endpoint);
                println!("  models:   {}", patterns.join(", "));
                println!("  api key:  {}", source);
            }
            Ok(())
        }
    }
}
