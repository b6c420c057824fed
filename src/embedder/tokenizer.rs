/// Sentence tokenizer wrapper around HuggingFace `tokenizers` crate.
///
/// Produces padded id, mask and segment rows for batched ONNX inference.
use std::path::Path;

use anyhow::Result;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Wrapper around the HuggingFace tokenizer shipped with the model.
pub struct SentenceTokenizer {
    inner: Tokenizer,
}

/// Output of a tokenization operation.
#[derive(Debug, Clone)]
pub struct TokenizerOutput {
    /// Token IDs (input_ids for the model).
    pub input_ids: Vec<i64>,
    /// Attention mask (1 for real tokens, 0 for padding).
    pub attention_mask: Vec<i64>,
    /// Segment ids, all zero for single-sentence input.
    pub token_type_ids: Vec<i64>,
}

impl TokenizerOutput {
    /// Number of real (non-padding) tokens.
    #[must_use]
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

impl SentenceTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file in the model directory.
    ///
    /// Sequences are truncated to `max_length` and padded to the longest
    /// sequence of each batch.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );
        anyhow::ensure!(max_length > 0, "max_length must be positive");

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("invalid truncation settings: {e}"))?;

        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self { inner })
    }

    /// Tokenize a batch. Every row has the same length.
    pub fn tokenize_batch(&self, texts: &[&str]) -> Result<Vec<TokenizerOutput>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        let widen = |values: &[u32]| values.iter().map(|&v| i64::from(v)).collect::<Vec<i64>>();

        let results = encodings
            .iter()
            .map(|enc| TokenizerOutput {
                input_ids: widen(enc.get_ids()),
                attention_mask: widen(enc.get_attention_mask()),
                token_type_ids: widen(enc.get_type_ids()),
            })
            .collect();

        Ok(results)
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}
