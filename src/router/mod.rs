//! Router module for channel selection.
//!
//! This module handles:
//! - Resolving a requested model to a channel's deployment name
//! - Filtering the channels a token may use down to the eligible ones
//! - Picking one eligible channel uniformly at random

mod resolver;
mod selector;

pub use resolver::{find_deployment, wildcard_match, DeploymentMatch};
pub use selector::{eligible_channels, list_models, pick, ChannelFilter, EligibleChannel};
