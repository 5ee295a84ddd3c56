//! Text-to-vector backends.
//!
//! `OnnxEmbedder` runs bge-small-en-v1.5 (384 dimensions) with mean pooling and
//! L2 normalization. `HashEmbedder` is a deterministic, model-free FNV-1a
//! bag-of-words embedder of the same width, used when no model is wanted and
//! in tests.

use hf_hub::api::sync::Api;
use ort::inputs;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};

use crate::errors::Error;

pub use crate::storage::embedding::EMBEDDING_DIMS;

/// A backend that turns text into 384-dim L2-normalized vectors.
pub trait Embedder: Send {
    /// Embed several texts in one call. Output order matches input order.
    fn embed_batch(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Error>;

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, Error> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| Error::Inference("embedder returned no vector".to_string()))
    }

    /// Stable identifier of the model, logged with search and index runs.
    fn id(&self) -> &str;
}

/// ONNX embedding engine.
pub struct OnnxEmbedder {
    model_id: String,
    session: Session,
    tokenizer: Tokenizer,
    requires_token_type_ids: bool,
}

impl OnnxEmbedder {
    /// Load model from the HF Hub cache, downloading on first use.
    ///
    /// Uses the blocking `hf_hub::api::sync::Api`; files are fetched once and
    /// then served from the local cache.
    pub fn new(model_id: &str) -> Result<Self, Error> {
        let api = Api::new()?;
        let repo = api.model(model_id.to_string());

        let model_path = repo
            .get("onnx/model.onnx")
            .or_else(|_| repo.get("model.onnx"))?;
        let tokenizer_path = repo.get("tokenizer.json")?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                ..Default::default()
            }))?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(ort::Error::from)?
            .commit_from_file(&model_path)?;

        let requires_token_type_ids = session
            .inputs()
            .iter()
            .any(|input| input.name() == "token_type_ids");

        tracing::info!(
            target: "notekeep.embedding",
            model = model_id,
            requires_token_type_ids,
            "onnx embedder loaded"
        );

        Ok(Self {
            model_id: model_id.to_string(),
            session,
            tokenizer,
            requires_token_type_ids,
        })
    }
}

impl Embedder for OnnxEmbedder {
    /// Texts are padded to the longest sequence in the batch; padding tokens
    /// carry a zero attention mask and do not contribute to the mean.
    ///
    /// Empty strings yield a zero vector.
    fn embed_batch(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Error> {
        let mut results = vec![vec![0.0f32; EMBEDDING_DIMS]; texts.len()];

        let mut encodings = Vec::new();
        for (slot, text) in texts.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            let encoding = self.tokenizer.encode(*text, true)?;
            if !encoding.get_ids().is_empty() {
                encodings.push((slot, encoding));
            }
        }
        if encodings.is_empty() {
            return Ok(results);
        }

        let batch = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|(_, e)| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut ids = vec![0i64; batch * seq_len];
        let mut mask = vec![0i64; batch * seq_len];
        for (row, (_, encoding)) in encodings.iter().enumerate() {
            let offset = row * seq_len;
            for (i, (&id, &m)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .enumerate()
            {
                ids[offset + i] = i64::from(id);
                mask[offset + i] = i64::from(m);
            }
        }

        let ids_tensor = Tensor::from_array(([batch, seq_len], ids))?;
        let mask_tensor = Tensor::from_array(([batch, seq_len], mask.clone()))?;

        let outputs = if self.requires_token_type_ids {
            let type_ids_tensor = Tensor::from_array(([batch, seq_len], vec![0i64; batch * seq_len]))?;
            self.session.run(inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_ids_tensor
            ])?
        } else {
            self.session.run(inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])?
        };

        let (shape, data) = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .ok_or_else(|| {
                Error::Inference(
                    "Output tensor 'last_hidden_state' or 'token_embeddings' not found".to_string(),
                )
            })?
            .try_extract_tensor::<f32>()?;

        if shape.len() != 3
            || shape[0] as usize != batch
            || shape[1] as usize != seq_len
            || shape[2] as usize != EMBEDDING_DIMS
        {
            return Err(Error::Inference(format!(
                "Unexpected output shape {:?}, expected [{batch}, {seq_len}, {EMBEDDING_DIMS}]",
                shape
            )));
        }

        for (row, (slot, _)) in encodings.iter().enumerate() {
            let row_mask = &mask[row * seq_len..(row + 1) * seq_len];
            let row_data = &data[row * seq_len * EMBEDDING_DIMS..(row + 1) * seq_len * EMBEDDING_DIMS];
            results[*slot] = mean_pool(row_data, row_mask);
        }
        Ok(results)
    }

    fn id(&self) -> &str {
        &self.model_id
    }
}

fn mean_pool(hidden: &[f32], mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; EMBEDDING_DIMS];
    for (token, &m) in hidden.chunks(EMBEDDING_DIMS).zip(mask) {
        let weight = m as f32;
        for (acc, value) in pooled.iter_mut().zip(token) {
            *acc += value * weight;
        }
    }
    let mask_sum = mask.iter().map(|&m| m as f32).sum::<f32>().max(1e-9);
    for value in &mut pooled {
        *value /= mask_sum;
    }
    l2_normalize(&pooled)
}

pub(crate) fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
    vec.iter().map(|x| x / norm).collect()
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const MIN_TOKEN_LEN: usize = 2;

/// Model-free FNV-1a embedder: each lowercase token adds ±1 to one dimension.
///
/// Captures lexical overlap only, never meaning.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; EMBEDDING_DIMS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= MIN_TOKEN_LEN)
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let index = (hash % EMBEDDING_DIMS as u64) as usize;
            let sign = if hash >> 63 == 1 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }
        l2_normalize(&embedding)
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Error> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn id(&self) -> &str {
        "fnv1a-384"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}
