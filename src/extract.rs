/// Text extraction for uploaded documents.
///
/// Plain text is decoded lossily. PDFs go through `lopdf` first; a PDF with no
/// text layer (a scan) is handed to the vision model when one is configured.
use std::path::Path;

use thiserror::Error;
use tokio_util::bytes::Bytes;
use tracing::{info, warn};

use crate::llm::{LlmClient, LlmError};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Only PDF and TXT files are supported")]
    Unsupported,

    #[error("invalid filename: {0}")]
    BadName(String),

    #[error("PDF parse failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("File is empty or no text could be extracted")]
    Empty,

    #[error("vision transcription failed: {0}")]
    Llm(#[from] LlmError),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    /// Classify by extension, case-insensitively.
    pub fn from_filename(name: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => Ok(FileKind::Pdf),
            Some("txt") => Ok(FileKind::Text),
            _ => Err(ExtractError::Unsupported),
        }
    }
}

/// Reduce a client-supplied filename to its final path component.
pub fn safe_filename(name: &str) -> Result<String, ExtractError> {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.'))
        .map(str::to_string)
        .ok_or_else(|| ExtractError::BadName(name.to_string()))
}

/// Text of the first `max_pages` pages of a PDF.
pub fn pdf_text(bytes: &[u8], max_pages: u32) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = doc
        .get_pages()
        .keys()
        .copied()
        .take(max_pages as usize)
        .collect();
    if pages.is_empty() {
        return Ok(String::new());
    }
    Ok(doc.extract_text(&pages)?)
}

/// Extract indexable text from an uploaded file.
pub async fn extract_text(
    kind: FileKind,
    filename: &str,
    bytes: Bytes,
    max_pages: u32,
    llm: Option<&LlmClient>,
) -> Result<String, ExtractError> {
    let content = match kind {
        FileKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
        FileKind::Pdf => {
            // Bytes clones share the upload buffer.
            let pdf = bytes.clone();
            let text = tokio::task::spawn_blocking(move || pdf_text(&pdf, max_pages)).await??;

            if !text.trim().is_empty() {
                text
            } else if let Some(llm) = llm.filter(|l| l.is_configured()) {
                info!(filename, "No text layer found, falling back to vision model");
                llm.transcribe_pdf(filename, &bytes).await?
            } else {
                warn!(filename, "No text layer found and no vision model configured");
                text
            }
        }
    };

    if content.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(content)
}
