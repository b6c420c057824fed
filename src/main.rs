use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragbridge::config::Config;
use ragbridge::embed_server::{self, EmbedState};
use ragbridge::embedder::download::download_model_files;
use ragbridge::embedder::onnx::OnnxEmbedder;
use ragbridge::engine::lightrag::LightRagClient;
use ragbridge::llm::LlmClient;
use ragbridge::server::{self, AppState};

#[derive(Parser)]
#[command(name = "ragbridge", version, about = "RAG chat backend and embedding service")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat backend
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the OpenAI-compatible embedding server
    Embed {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            run_chat(config).await
        }
        Command::Embed { host, port } => {
            if let Some(host) = host {
                config.embedding.host = host;
            }
            if let Some(port) = port {
                config.embedding.port = port;
            }
            config.validate()?;
            run_embed(config).await
        }
    }
}

async fn run_chat(config: Config) -> Result<()> {
    info!("Starting chat backend (LightRAG at {})", config.rag.base_url);

    let engine = LightRagClient::new(&config.rag).context("failed to build LightRAG client")?;
    let llm = LlmClient::new(config.llm.clone()).context("failed to build LLM client")?;
    if !llm.is_configured() {
        warn!("No LLM API key configured, scanned PDFs cannot be transcribed");
    }

    let state = AppState::new(Arc::new(engine), Arc::new(config)).with_llm(Arc::new(llm));
    server::serve(state).await
}

async fn run_embed(config: Config) -> Result<()> {
    let embedding = config.embedding;
    let model_dir = embedding.model_dir();
    info!(model = %embedding.model_id, dir = %model_dir.display(), "Starting embedding server");

    let load_cfg = embedding.clone();
    let embedder = tokio::task::spawn_blocking(move || -> Result<OnnxEmbedder> {
        download_model_files(&load_cfg.model_id, &model_dir)?;
        OnnxEmbedder::new(&model_dir, &load_cfg).context("failed to load embedding model")
    })
    .await
    .context("model loading task failed")??;

    let runtime_device = embedder.device().to_string();
    let state = EmbedState::new(Arc::new(embedder), embedding, runtime_device);
    embed_server::serve(state).await
}
