//! HTTP server setup and configuration.

use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use super::tasks::BackgroundTasks;
use crate::config::Config;
use crate::providers::AdapterRegistry;
use crate::quota::QuotaAccountant;
use crate::storage::ConfigStore;

/// Response header carrying the request's correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id attached to every request as an extension.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConfigStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub http_client: Client,
    pub accountant: QuotaAccountant,
    pub tasks: BackgroundTasks,
}

impl AppState {
    /// State with the standard adapters and a fresh task tracker.
    pub fn new(store: Arc<dyn ConfigStore>, http_client: Client) -> Self {
        Self {
            accountant: QuotaAccountant::new(store.clone()),
            store,
            adapters: Arc::new(AdapterRegistry::standard()),
            http_client,
            tasks: BackgroundTasks::new(),
        }
    }
}

/// Longest silence tolerated between two reads of an upstream body.
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for upstream calls.
pub fn build_http_client() -> reqwest::Result<Client> {
    http_client_with_read_timeout(UPSTREAM_READ_TIMEOUT)
}

/// Upstream client with no overall deadline: a stream may run as long as
/// it keeps producing data within `read_timeout`.
pub fn http_client_with_read_timeout(read_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(read_timeout)
        .build()
}

async fn assign_request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Proxy endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, no longer accepting connections");
}

/// Run the HTTP server until Ctrl-C, then wait for background usage tasks.
pub async fn run_server(config: Config, store: Arc<dyn ConfigStore>) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);

    let state = AppState::new(store, build_http_client()?);
    let tasks = state.tasks.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting llmgate server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(pending = tasks.len(), "Waiting for background usage tasks");
    if tasks.drain(grace).await {
        tracing::info!("All usage recorded, exiting");
    }
    Ok(())
}
