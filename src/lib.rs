//! # ragbridge - RAG chat backend and embedding service
//!
//! Thin HTTP services in front of a LightRAG server: a chat backend that
//! answers questions in one or two retrieval modes (streamed as SSE), and an
//! OpenAI-compatible sentence-embedding endpoint backed by ONNX Runtime.
//!
//! ## Architecture
//!
//! - **[`multiplex`]**: Merges per-mode answer streams into one tagged event feed
//! - **[`engine`]**: `QueryEngine` seam, LightRAG HTTP client, scripted mock
//! - **[`server`]**: Chat backend (`/api/chat`, `/api/documents`, `/api/upload`, `/api/health`)
//! - **[`extract`]**: Upload text extraction (TXT and PDF with a vision-model fallback)
//! - **[`llm`]**: OpenAI-compatible chat-completion client
//! - **[`embedder`]**: Text embedding via ONNX Runtime plus model download
//! - **[`embed_server`]**: `/v1/embeddings` microservice
//! - **[`config`]**: JSON configuration with environment overrides

pub mod config;
pub mod embed_server;
pub mod embedder;
pub mod engine;
pub mod extract;
pub mod llm;
pub mod multiplex;
pub mod server;
