/// Configuration module for ragbridge.
///
/// Handles loading, validating, and providing default configuration values
/// for both the chat backend and the embedding server.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::multiplex::MultiplexOptions;

// ── Default value functions ──────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_chat_port() -> u16 {
    8000
}

fn default_embed_port() -> u16 {
    8001
}

fn default_rag_url() -> String {
    "http://localhost:9621".to_string()
}

fn default_working_dir() -> String {
    "./data".to_string()
}

fn default_answer_instruction() -> String {
    "STRICT INSTRUCTION: Output ONLY the relevant information. \
     DO NOT use introductory phrases such as 'Based on the information provided...' or 'Here is...'. \
     Directly provide the answer based on the context."
        .to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_pdf_pages() -> u32 {
    5
}

fn default_max_upload_mb() -> usize {
    50
}

fn default_llm_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_vision_model() -> String {
    "qwen/qwen3-vl-235b-a22b-instruct".to_string()
}

fn default_referer() -> String {
    "https://github.com/traffic/law-assistant".to_string()
}

fn default_app_title() -> String {
    "Traffic Law Assistant".to_string()
}

fn default_model_id() -> String {
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn default_served_name() -> String {
    "vi-embed".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_batch() -> usize {
    64
}

fn default_max_length() -> usize {
    128
}

fn default_dimensions() -> usize {
    384
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_chat_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    /// Base URL of the LightRAG server.
    #[serde(default = "default_rag_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Appended to every user message before it is sent to the engine.
    #[serde(default = "default_answer_instruction")]
    pub answer_instruction: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-provider deadline for streamed answers. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    /// Where uploaded files are stored.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: u32,

    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_referer")]
    pub referer: String,

    #[serde(default = "default_app_title")]
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_embed_port")]
    pub port: u16,

    /// HuggingFace repository the ONNX model is fetched from.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Model name advertised on `/v1/models`.
    #[serde(default = "default_served_name")]
    pub served_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,

    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_true")]
    pub fallback_to_cpu: bool,

    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Whether the ONNX graph takes a `token_type_ids` input.
    #[serde(default = "default_true")]
    pub token_type_ids: bool,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_chat_port(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            base_url: default_rag_url(),
            api_key: None,
            answer_instruction: default_answer_instruction(),
            poll_interval_ms: default_poll_interval_ms(),
            provider_timeout_secs: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            max_pdf_pages: default_max_pdf_pages(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            vision_model: default_vision_model(),
            referer: default_referer(),
            title: default_app_title(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_embed_port(),
            model_id: default_model_id(),
            served_name: default_served_name(),
            model_dir: None,
            device: default_device(),
            fallback_to_cpu: default_true(),
            max_batch: default_max_batch(),
            max_length: default_max_length(),
            dimensions: default_dimensions(),
            token_type_ids: default_true(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let mut cfg = Self::load_file(config_path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn load_file(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        match serde_json::from_str(&data) {
            Ok(c) => {
                info!("Loaded configuration from {path}");
                Ok(c)
            }
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Overlay values from the environment. Secrets are only ever read from here
    /// when the file leaves them unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("LIGHTRAG_URL") {
            self.rag.base_url = url;
        }
        if self.rag.api_key.is_none() {
            self.rag.api_key = non_empty("LIGHTRAG_API_KEY");
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = non_empty("OPENROUTER_API_KEY");
        }
        if let Some(id) = non_empty("MODEL_ID") {
            self.embedding.model_id = id;
        }
        if let Some(device) = non_empty("DEVICE") {
            self.embedding.device = device.trim().to_lowercase();
        }
        if let Some(batch) = non_empty("MAX_BATCH") {
            match batch.trim().parse() {
                Ok(n) => self.embedding.max_batch = n,
                Err(e) => warn!("Ignoring MAX_BATCH={batch}: {e}"),
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.rag.base_url.is_empty(),
            "rag.base_url must be specified"
        );
        anyhow::ensure!(
            self.rag.poll_interval_ms > 0,
            "rag.poll_interval_ms must be positive"
        );
        anyhow::ensure!(
            self.rag.provider_timeout_secs != Some(0),
            "rag.provider_timeout_secs must be positive when set"
        );
        anyhow::ensure!(
            self.upload.max_pdf_pages > 0,
            "upload.max_pdf_pages must be positive"
        );
        anyhow::ensure!(
            self.upload.max_upload_mb > 0,
            "upload.max_upload_mb must be positive"
        );
        anyhow::ensure!(
            self.embedding.max_batch > 0,
            "embedding.max_batch must be positive"
        );
        anyhow::ensure!(
            self.embedding.max_length > 0,
            "embedding.max_length must be positive"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        Ok(())
    }
}

impl RagConfig {
    /// Multiplexer settings derived from this section.
    #[must_use]
    pub fn multiplex_options(&self) -> MultiplexOptions {
        MultiplexOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            provider_timeout: self.provider_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl EmbeddingConfig {
    /// Directory holding the model files: explicit `model_dir`, or
    /// `models/<last segment of model_id>`.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        match &self.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let name = self
                    .model_id
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("model");
                Path::new("models").join(name)
            }
        }
    }

    /// Whether a request naming `model` may be served by this instance.
    #[must_use]
    pub fn accepts_model(&self, model: &str) -> bool {
        model == self.model_id || model == self.served_name
    }
}

// ── Tests ────────────────────────────────────────────────────────────
