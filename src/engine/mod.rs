/// Query engine seam and shared query types.
///
/// The graph-RAG engine is an external service; everything in the crate talks
/// to it through [`QueryEngine`].
pub mod lightrag;
pub mod mock;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a query engine call or by one of its streams.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed engine response: {0}")]
    Decode(String),

    #[error("engine reported: {0}")]
    Remote(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Retrieval strategy used to gather context before generating an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Naive,
    Hybrid,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Naive => "naive",
            Mode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "naive" => Ok(Mode::Naive),
            "hybrid" => Ok(Mode::Hybrid),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// One turn of prior conversation forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// A single call into the engine.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub mode: Mode,
    pub stream: bool,
    pub history: Vec<HistoryMessage>,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: Mode) -> Self {
        Self {
            text: text.into(),
            mode,
            stream: false,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Stream of answer fragments produced by a streaming query.
pub type PieceStream = BoxStream<'static, Result<String, EngineError>>;

/// Resolved shape of a query: a finished answer or a stream of fragments.
///
/// Callers must handle both; an engine may answer a streaming request with a
/// complete value (cache hits do this).
pub enum QueryOutput {
    Value(String),
    Stream(PieceStream),
}

impl fmt::Debug for QueryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutput::Value(v) => f.debug_tuple("Value").field(v).finish(),
            QueryOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl QueryOutput {
    /// Drain the output into one string.
    pub async fn collect(self) -> Result<String, EngineError> {
        use futures::TryStreamExt;

        match self {
            QueryOutput::Value(v) => Ok(v),
            QueryOutput::Stream(s) => s.try_collect::<Vec<_>>().await.map(|p| p.concat()),
        }
    }
}

/// Processing state of an indexed document as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStatus {
    pub id: String,
    pub status: String,
    pub file_path: Option<String>,
    pub content_summary: Option<String>,
}

/// Contract for the external graph-RAG engine.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// behind `Arc` by every request handler.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Answer a query. May resolve to a value even when `query.stream` is set.
    async fn query(&self, query: Query) -> Result<QueryOutput, EngineError>;

    /// Insert a document's text into the knowledge base.
    async fn insert(&self, text: &str, source: &str) -> Result<(), EngineError>;

    /// List documents known to the engine.
    async fn documents(&self) -> Result<Vec<DocumentStatus>, EngineError>;
}
