/// Chat backend HTTP server.
///
/// Provides `AppState` (shared state), the `/api` router and startup logic.
pub mod error;
pub mod routes;
pub mod schemas;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::QueryEngine;
use crate::llm::LlmClient;

/// Shared application context available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn QueryEngine>,
    pub llm: Option<Arc<LlmClient>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<dyn QueryEngine>, config: Arc<Config>) -> Self {
        Self {
            engine,
            llm: None,
            config,
        }
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }
}

/// Build the router with every endpoint mounted under `/api`.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.upload.max_upload_mb * 1024 * 1024;

    let api = Router::new()
        .route("/chat", post(routes::chat))
        .route("/documents", get(routes::list_documents))
        .route(
            "/upload",
            post(routes::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/health", get(routes::health));

    Router::new()
        .nest("/api", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the chat backend until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Chat backend listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat backend terminated with an error")?;

    Ok(())
}

pub(crate) async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}
