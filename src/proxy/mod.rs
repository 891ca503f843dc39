//! HTTP proxy server module.
//!
//! This module provides the client-facing API, and the stream plumbing the
//! provider adapters use to relay responses while capturing usage.

mod handlers;
mod server;
pub mod stream;
pub mod tasks;
pub mod tee;

pub use server::{
    build_http_client, create_router, http_client_with_read_timeout, run_server, AppState, RequestId,
    REQUEST_ID_HEADER,
};
pub use tasks::BackgroundTasks;
