/// OpenAI-compatible embedding microservice.
///
/// 1. `GET /health`          – model id and device
/// 2. `GET /v1/models`       – the single served model
/// 3. `POST /v1/embeddings`  – one vector per input, in input order
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use crate::config::EmbeddingConfig;
use crate::embedder::{Embedder, EmbedderError, Encoded};

/// Shared state of the embedding service.
#[derive(Clone)]
pub struct EmbedState {
    embedder: Arc<dyn Embedder>,
    config: Arc<EmbeddingConfig>,
    runtime_device: String,
}

impl EmbedState {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        config: EmbeddingConfig,
        runtime_device: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            config: Arc::new(config),
            runtime_device: runtime_device.into(),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub input: EmbeddingInput,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_normalize() -> bool {
    true
}

/// `input` may be any JSON value: one scalar or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Batch(Vec<Value>),
    Single(Value),
}

impl EmbeddingInput {
    /// Flatten into the texts to encode.
    ///
    /// Non-string scalars are encoded as their JSON text, null list items
    /// become empty strings and blank items are replaced by a single space so
    /// every input still yields a vector.
    #[must_use]
    pub fn into_texts(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            EmbeddingInput::Single(value) => vec![scalar_text(value)],
            EmbeddingInput::Batch(items) => items.into_iter().map(scalar_text).collect(),
        };
        raw.into_iter()
            .map(|t| if t.trim().is_empty() { " ".to_string() } else { t })
            .collect()
    }
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingData {
    pub object: &'static str,
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum EmbedApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error("embedding task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for EmbedApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self {
            EmbedApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            EmbedApiError::Embedding(_) | EmbedApiError::Task(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
        };
        if status.is_server_error() {
            error!(error = %self, "Embedding request failed");
        }
        let body = json!({ "error": { "message": self.to_string(), "type": kind } });
        (status, Json(body)).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn health(State(state): State<EmbedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model_id": state.config.model_id,
        "device": state.config.device,
        "runtime_device": state.runtime_device,
    }))
}

pub async fn list_models(State(state): State<EmbedState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.served_name,
            "object": "model",
            "owned_by": "local",
        }],
    }))
}

pub async fn embeddings(
    State(state): State<EmbedState>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, EmbedApiError> {
    let Json(req) = payload.map_err(|e| EmbedApiError::BadRequest(e.body_text()))?;
    if let Some(model) = req
        .model
        .as_deref()
        .filter(|m| !state.config.accepts_model(m))
    {
        return Err(EmbedApiError::BadRequest(format!(
            "model '{model}' is not served here (available: {})",
            state.config.served_name
        )));
    }

    let model = req
        .model
        .clone()
        .unwrap_or_else(|| state.config.served_name.clone());
    let texts = req.input.into_texts();
    let normalize = req.normalize;
    let max_batch = state.config.max_batch.max(1);
    let embedder = Arc::clone(&state.embedder);

    debug!(inputs = texts.len(), max_batch, "Embedding request");

    let encoded = tokio::task::spawn_blocking(move || {
        encode_in_batches(embedder.as_ref(), &texts, max_batch, normalize)
    })
    .await??;

    let data = encoded
        .vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| EmbeddingData {
            object: "embedding",
            index,
            embedding,
        })
        .collect();

    Ok(Json(EmbeddingResponse {
        object: "list",
        data,
        model,
        usage: Usage {
            prompt_tokens: encoded.tokens,
            total_tokens: encoded.tokens,
        },
    }))
}

/// Encode `texts` in chunks of at most `max_batch`, preserving order.
fn encode_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    max_batch: usize,
    normalize: bool,
) -> Result<Encoded, EmbedderError> {
    let mut vectors = Vec::with_capacity(texts.len());
    let mut tokens = 0;

    for chunk in texts.chunks(max_batch) {
        let batch: Vec<&str> = chunk.iter().map(String::as_str).collect();
        let out = embedder.encode(&batch, normalize)?;
        if out.vectors.len() != batch.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} vectors, got {}",
                batch.len(),
                out.vectors.len()
            )));
        }
        tokens += out.tokens;
        vectors.extend(out.vectors);
    }

    Ok(Encoded { vectors, tokens })
}

// ── Router ───────────────────────────────────────────────────────────

pub fn router(state: EmbedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/embeddings", post(embeddings))
        .with_state(state)
}

/// Serve the embedding API until Ctrl-C.
pub async fn serve(state: EmbedState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        model = %state.config.model_id,
        served_as = %state.config.served_name,
        "Embedding server listening on http://{addr}"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(crate::server::shutdown_signal())
        .await
        .context("embedding server terminated with an error")?;

    Ok(())
}
