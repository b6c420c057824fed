/// OpenAI-compatible chat completion client (OpenRouter by default).
///
/// Only non-streaming completions are needed: the client transcribes scanned
/// PDFs that carry no extractable text layer.
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::config::LlmConfig;

const TRANSCRIBE_PROMPT: &str = "You are an elite legal document parser. Extract every character \
from the document with 100% fidelity. STRICT INSTRUCTION: Output ONLY the raw extracted text. \
NO PREAMBLE. NO CONVERSATION. NO INTRODUCTIONS. Directly start with the content of the document. \
Maintain original layout, headers, and spacing.";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response had no content")]
    EmptyResponse,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Run one chat completion and return the assistant's text.
    pub async fn complete(&self, model: &str, messages: Value) -> Result<String, LlmError> {
        let key = self.config.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let resp = self
            .client
            .post(url)
            .bearer_auth(key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&json!({ "model": model, "messages": messages }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: CompletionReply = resp.json().await?;
        first_content(reply).ok_or(LlmError::EmptyResponse)
    }

    /// Ask the vision model for the raw text of a PDF.
    pub async fn transcribe_pdf(&self, filename: &str, pdf: &[u8]) -> Result<String, LlmError> {
        info!(
            filename,
            bytes = pdf.len(),
            model = %self.config.vision_model,
            "Transcribing PDF with vision model"
        );
        self.complete(&self.config.vision_model, pdf_messages(filename, pdf))
            .await
    }
}

fn first_content(reply: CompletionReply) -> Option<String> {
    reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
}

fn pdf_messages(filename: &str, pdf: &[u8]) -> Value {
    let data = format!("data:application/pdf;base64,{}", BASE64.encode(pdf));
    json!([
        { "role": "system", "content": TRANSCRIBE_PROMPT },
        {
            "role": "user",
            "content": [
                { "type": "text", "text": format!("--- {filename} ---") },
                { "type": "file", "file": { "filename": filename, "file_data": data } }
            ]
        }
    ])
}
