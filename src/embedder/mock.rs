/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on text hash.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, Encoded, l2_normalize};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without loading a real ONNX model.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        (0..self.dimensions)
            .map(|i| f32::from(bytes[i % 8]) / 255.0 + 0.01)
            .collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Encoded, EmbedderError> {
        let vectors = texts
            .iter()
            .map(|t| {
                let mut v = self.vector(t);
                if normalize {
                    l2_normalize(&mut v);
                }
                v
            })
            .collect();
        // One "token" per whitespace-separated word, plus the two specials.
        let tokens = texts.iter().map(|t| t.split_whitespace().count() + 2).sum();
        Ok(Encoded { vectors, tokens })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
