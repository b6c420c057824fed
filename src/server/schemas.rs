/// Request and response bodies of the chat backend.
use serde::{Deserialize, Serialize};

use crate::engine::{DocumentStatus, HistoryMessage, Mode};

const SUMMARY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub comparison_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub response: String,
    pub mode: Mode,
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
}

impl ChatResponse {
    pub fn new(response: String, mode: Mode) -> Self {
        Self {
            response,
            mode,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonResponse {
    pub naive: ChatResponse,
    pub hybrid: ChatResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub filename: String,
    pub status: String,
    pub message: String,
}

impl UploadResponse {
    pub fn success(filename: String, chars: usize) -> Self {
        Self {
            filename,
            status: "success".to_string(),
            message: format!("File uploaded and indexed ({chars} characters)"),
        }
    }

    pub fn failure(filename: String, reason: impl std::fmt::Display) -> Self {
        Self {
            filename,
            status: "error".to_string(),
            message: format!("Failed to index file: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub id: String,
    pub status: String,
    pub source: String,
    pub content_summary: String,
}

impl From<DocumentStatus> for DocumentSummary {
    fn from(doc: DocumentStatus) -> Self {
        let content_summary = match doc.content_summary.as_deref() {
            Some(s) if !s.is_empty() => {
                let preview: String = s.chars().take(SUMMARY_PREVIEW_CHARS).collect();
                format!("{preview}...")
            }
            _ => String::new(),
        };
        Self {
            id: doc.id,
            status: doc.status,
            source: doc
                .file_path
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            content_summary,
        }
    }
}
