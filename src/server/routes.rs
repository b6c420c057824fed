/// HTTP handlers for the chat backend.
///
/// 1. `POST /chat`      – answer a question, optionally streamed and/or in comparison mode
/// 2. `GET /documents`  – list documents known to the engine
/// 3. `POST /upload`    – store, extract and index a PDF or TXT file
/// 4. `GET /health`     – liveness check
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::{HeaderName, HeaderValue, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::{info, warn};

use super::AppState;
use super::error::ApiError;
use super::schemas::{ChatRequest, ChatResponse, ComparisonResponse, DocumentSummary, UploadResponse};
use crate::engine::{HistoryMessage, Mode, Query, QueryEngine};
use crate::extract::{self, ExtractError, FileKind};
use crate::multiplex::{Event, QueryFuture, multiplex};

const COMPARISON_MODES: [Mode; 2] = [Mode::Naive, Mode::Hybrid];
const DEFAULT_MODE: Mode = Mode::Hybrid;

// ── Chat ─────────────────────────────────────────────────────────────

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    info!(
        message = %preview(&req.message, 20),
        comparison_mode = req.comparison_mode,
        stream = req.stream,
        "Chat request received"
    );

    let full_query = format!("{}\n\n{}", req.message, state.config.rag.answer_instruction);
    let modes: &[Mode] = if req.comparison_mode {
        &COMPARISON_MODES
    } else {
        &[DEFAULT_MODE]
    };

    if req.stream {
        return Ok(stream_answers(&state, &full_query, &req.history, modes));
    }

    if req.comparison_mode {
        let (naive, hybrid) = tokio::join!(
            ask(&state.engine, &full_query, &req.history, Mode::Naive),
            ask(&state.engine, &full_query, &req.history, Mode::Hybrid),
        );
        let body = ComparisonResponse {
            naive: ChatResponse::new(naive?, Mode::Naive),
            hybrid: ChatResponse::new(hybrid?, Mode::Hybrid),
        };
        return Ok(Json(body).into_response());
    }

    let answer = ask(&state.engine, &full_query, &req.history, DEFAULT_MODE).await?;
    Ok(Json(ChatResponse::new(answer, DEFAULT_MODE)).into_response())
}

/// Complete (non-streamed) answer for one mode.
async fn ask(
    engine: &Arc<dyn QueryEngine>,
    text: &str,
    history: &[HistoryMessage],
    mode: Mode,
) -> Result<String, ApiError> {
    let query = Query::new(text, mode).with_history(history.to_vec());
    Ok(engine.query(query).await?.collect().await?)
}

fn stream_answers(
    state: &AppState,
    text: &str,
    history: &[HistoryMessage],
    modes: &[Mode],
) -> Response {
    let sources: Vec<(Mode, QueryFuture)> = modes
        .iter()
        .map(|&mode| {
            let engine = Arc::clone(&state.engine);
            let query = Query::new(text, mode)
                .streaming(true)
                .with_history(history.to_vec());
            let fut: QueryFuture = Box::pin(async move { engine.query(query).await });
            (mode, fut)
        })
        .collect();

    let feed = multiplex(sources, state.config.rag.multiplex_options())
        .map(|event| Ok::<_, Infallible>(to_sse(&event)));

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        (
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ];

    (headers, Sse::new(feed).keep_alive(KeepAlive::default())).into_response()
}

/// Frame one event as `data: <json>`.
fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default().json_data(event).unwrap_or_else(|e| {
        let fallback = serde_json::json!({ "type": "error", "message": e.to_string() });
        SseEvent::default().data(fallback.to_string())
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

// ── Documents ────────────────────────────────────────────────────────

pub async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let docs = state.engine.documents().await?;
    Ok(Json(docs.into_iter().map(DocumentSummary::from).collect()))
}

// ── Upload ───────────────────────────────────────────────────────────

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
        file = Some((name, bytes));
        break;
    }

    let (raw_name, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("missing form field: file".to_string()))?;
    let kind = FileKind::from_filename(&raw_name).map_err(to_bad_request)?;
    let filename = extract::safe_filename(&raw_name).map_err(to_bad_request)?;

    let upload_cfg = &state.config.upload;
    let dir = Path::new(&upload_cfg.working_dir);
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create {}: {e}", dir.display())))?;
    let dest = dir.join(&filename);
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to save {filename}: {e}")))?;
    info!(file = %dest.display(), bytes = bytes.len(), "Saved upload");

    let content = match extract::extract_text(
        kind,
        &filename,
        bytes,
        upload_cfg.max_pdf_pages,
        state.llm.as_deref(),
    )
    .await
    {
        Ok(c) => c,
        Err(e) => {
            warn!(%filename, error = %e, "Extraction failed");
            return Ok(Json(UploadResponse::failure(filename, e)));
        }
    };

    if let Err(e) = state.engine.insert(&content, &filename).await {
        warn!(%filename, error = %e, "Indexing failed");
        return Ok(Json(UploadResponse::failure(filename, e)));
    }

    let chars = content.chars().count();
    info!(%filename, chars, "Indexed upload");
    Ok(Json(UploadResponse::success(filename, chars)))
}

fn to_bad_request(e: ExtractError) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

// ── Health ───────────────────────────────────────────────────────────

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
