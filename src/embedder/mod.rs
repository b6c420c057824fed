/// Embedder trait and shared types for sentence embedding.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use thiserror::Error;
use tracing::warn;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Vectors for a batch of inputs plus the number of tokens consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub vectors: Vec<Vec<f32>>,
    pub tokens: usize,
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Encode a batch of texts, one vector per input in input order.
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Encoded, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Embed a single text string into a normalized vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.encode(&[text], true)?
            .vectors
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("no vector returned".to_string()))
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec {
        *v *= inv_norm;
    }
}

/// Map a requested device onto one this build can execute on.
///
/// Only the CPU execution provider is linked; other devices either fall back
/// to it or are rejected.
pub fn resolve_device(requested: &str, fallback_to_cpu: bool) -> Result<String, EmbedderError> {
    match requested {
        "" | "auto" | "cpu" => Ok("cpu".to_string()),
        other if fallback_to_cpu => {
            warn!("Device {other} is not available, falling back to cpu");
            Ok("cpu".to_string())
        }
        other => Err(EmbedderError::ModelLoadFailed(format!(
            "device {other} is not available and fallback_to_cpu is disabled"
        ))),
    }
}
