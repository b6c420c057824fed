/// ONNX Runtime embedder using the `ort` crate.
///
/// Loads a sentence-transformers ONNX export, runs padded batch inference,
/// applies mean pooling with attention mask, and optionally L2-normalizes.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{SentenceTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError, Encoded, l2_normalize, resolve_device};
use crate::config::EmbeddingConfig;

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: SentenceTokenizer,
    dimensions: usize,
    token_type_ids: bool,
    device: String,
}

impl OnnxEmbedder {
    /// Load the model and tokenizer from `model_dir`.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in `model_dir`.
    pub fn new(model_dir: &Path, config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        let device = resolve_device(&config.device, config.fallback_to_cpu)?;
        info!(%device, model = %config.model_id, "Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        info!("ONNX model loaded successfully");

        let tokenizer = SentenceTokenizer::from_model_dir(model_dir, config.max_length)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("tokenizer error: {e}")))?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions: config.dimensions,
            token_type_ids: config.token_type_ids,
            device,
        })
    }

    /// Device the session actually runs on.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Embedder for OnnxEmbedder {
    fn encode(&self, texts: &[&str], normalize: bool) -> Result<Encoded, EmbedderError> {
        if texts.is_empty() {
            return Ok(Encoded {
                vectors: Vec::new(),
                tokens: 0,
            });
        }

        let rows = self
            .tokenizer
            .tokenize_batch(texts)
            .map_err(|e| EmbedderError::TokenizerError(format!("tokenization failed: {e}")))?;

        let batch = rows.len();
        let seq_len = rows.first().map_or(0, |r| r.input_ids.len());
        if seq_len == 0 {
            return Err(EmbedderError::TokenizerError(
                "tokenizer produced empty sequences".to_string(),
            ));
        }

        // (shape, data) tuple form avoids ndarray version coupling with ort
        let shape = [batch, seq_len];
        let input_ids = Tensor::from_array((shape, flatten(&rows, |r| &r.input_ids)))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask = Tensor::from_array((shape, flatten(&rows, |r| &r.attention_mask)))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;

        let run = if self.token_type_ids {
            let token_type_ids = Tensor::from_array((shape, flatten(&rows, |r| &r.token_type_ids)))
                .map_err(|e| {
                    EmbedderError::InferenceFailed(format!("token_type_ids error: {e}"))
                })?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
        };
        let outputs =
            run.map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Output 0 is the last hidden state: [batch, seq_len, hidden_size]
        let (_shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let hidden_size = hidden_size(hidden_data.len(), batch, seq_len)?;
        if hidden_size != self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "model produced {hidden_size}-dim vectors, expected {}",
                self.dimensions
            )));
        }

        let row_len = seq_len * hidden_size;
        let vectors = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let hidden = &hidden_data[i * row_len..(i + 1) * row_len];
                let mut vec = mean_pooling(hidden, &row.attention_mask, seq_len, hidden_size);
                if normalize {
                    l2_normalize(&mut vec);
                }
                vec
            })
            .collect();

        let tokens = rows.iter().map(TokenizerOutput::real_tokens).sum();
        debug!(batch, seq_len, tokens, "Encoded batch");

        Ok(Encoded { vectors, tokens })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Concatenate one field of every row into a row-major buffer.
fn flatten(rows: &[TokenizerOutput], field: impl Fn(&TokenizerOutput) -> &Vec<i64>) -> Vec<i64> {
    rows.iter().flat_map(|r| field(r).iter().copied()).collect()
}

/// Infer the hidden size from a flat `[batch, seq_len, hidden]` buffer.
fn hidden_size(len: usize, batch: usize, seq_len: usize) -> Result<usize, EmbedderError> {
    let cells = batch * seq_len;
    if cells == 0 || len == 0 || len % cells != 0 {
        return Err(EmbedderError::InferenceFailed(format!(
            "unexpected output size {len} for batch {batch} x {seq_len} tokens"
        )));
    }
    Ok(len / cells)
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_simple() {
        // 1 token, hidden_size=3, all attention=1
        let hidden = vec![1.0, 2.0, 3.0];
        let mask = vec![1i64];
        let result = mean_pooling(&hidden, &mask, 1, 3);
        assert_eq!(result, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_with_padding() {
        // 2 tokens, hidden_size=2, second token is padding (mask=0)
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let mask = vec![1i64, 0i64];
        let result = mean_pooling(&hidden, &mask, 2, 2);
        assert_eq!(result, vec![1.0, 2.0]);
    }

    #[test]
    fn test_mean_pooling_averages() {
        let hidden = vec![1.0, 3.0, 3.0, 5.0];
        let mask = vec![1i64, 1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![2.0, 4.0]);
    }

    #[test]
    fn test_hidden_size() {
        assert_eq!(hidden_size(2 * 5 * 384, 2, 5).unwrap(), 384);
        assert!(hidden_size(0, 2, 5).is_err());
        assert!(hidden_size(7, 2, 5).is_err());
    }

    #[test]
    fn test_flatten_row_major() {
        let rows = vec![
            TokenizerOutput {
                input_ids: vec![1, 2],
                attention_mask: vec![1, 1],
                token_type_ids: vec![0, 0],
            },
            TokenizerOutput {
                input_ids: vec![3, 0],
                attention_mask: vec![1, 0],
                token_type_ids: vec![0, 0],
            },
        ];
        assert_eq!(flatten(&rows, |r| &r.input_ids), vec![1, 2, 3, 0]);
        assert_eq!(flatten(&rows, |r| &r.attention_mask), vec![1, 1, 1, 0]);
    }

    /// Integration test requiring actual model files.
    #[test]
    #[ignore]
    fn test_onnx_encode_batch() {
        let config = EmbeddingConfig::default();
        let model_dir = config.model_dir();
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder = OnnxEmbedder::new(&model_dir, &config).unwrap();
        let out = embedder
            .encode(&["Xin chào", "Tốc độ tối đa của xe là bao nhiêu?"], true)
            .unwrap();

        assert_eq!(out.vectors.len(), 2);
        assert!(out.tokens > 0);
        for vec in &out.vectors {
            assert_eq!(vec.len(), 384);
            let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01, "expected unit vector, got norm={norm}");
        }
    }
}
