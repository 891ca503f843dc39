//! llmgate - Quota-metered gateway for OpenAI, Azure OpenAI and Claude
//!
//! This library provides the core of the llmgate proxy: configuration,
//! channel routing, provider adapters, Claude/OpenAI translation and usage
//! accounting.

pub mod channel;
pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod quota;
pub mod router;
pub mod storage;
pub mod translate;
pub mod usage;

pub use config::Config;
pub use error::{Error, Result};
