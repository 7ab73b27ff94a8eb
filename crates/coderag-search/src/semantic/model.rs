use anyhow::{Context, Result, bail};
use coderag_core::config::RerankConfig;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "semantic-ort")]
use anyhow::anyhow;
#[cfg(feature = "semantic-ort")]
use ort::session::Session;
#[cfg(feature = "semantic-ort")]
use ort::value::Tensor;
#[cfg(feature = "semantic-ort")]
use parking_lot::Mutex;
#[cfg(feature = "semantic-ort")]
use tokenizers::Tokenizer;

use super::CrossEncoder;

pub(crate) const MODEL_FILENAME: &str = "model.onnx";
pub(crate) const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// Short names accepted wherever a reranker model id is expected.
const RERANK_MODELS: &[(&str, &str)] = &[
    ("bge-reranker-v2-m3", "BAAI/bge-reranker-v2-m3"),
    ("bge-reranker-large", "BAAI/bge-reranker-large"),
    ("bge-reranker-base", "BAAI/bge-reranker-base"),
    ("ms-marco-MiniLM-L-6-v2", "cross-encoder/ms-marco-MiniLM-L-6-v2"),
    ("ms-marco-MiniLM-L-12-v2", "cross-encoder/ms-marco-MiniLM-L-12-v2"),
];

/// Expand a short alias to its full model id; other ids pass through.
#[must_use]
pub fn resolve_reranker_model(key: &str) -> &str {
    RERANK_MODELS
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, full)| *full)
}

/// Directory expected to hold `model.onnx` and `tokenizer.json`.
///
/// Uses `config.model_dir` when set, else
/// `dirs::cache_dir() / coderag / models / <model id with '/' as "--">`.
///
/// # Errors
///
/// Fails when no directory is configured and the OS has no cache directory.
pub fn model_dir(model_id: &str, config: &RerankConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.model_dir {
        return Ok(dir.clone());
    }
    let mut path = dirs::cache_dir().context("unable to determine OS cache directory")?;
    path.push("coderag");
    path.push("models");
    path.push(model_id.replace('/', "--"));
    Ok(path)
}

/// Check a model file against an expected hex SHA-256.
///
/// # Errors
///
/// Fails when the file cannot be read or the digest differs.
pub fn verify_model_checksum(path: &Path, expected_sha256: &str) -> Result<()> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read model {}", path.display()))?;
    let actual = sha256_hex(&contents);
    if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        bail!(
            "reranker model at {} failed SHA256 verification (expected {}, got {actual})",
            path.display(),
            expected_sha256.trim()
        );
    }
    Ok(())
}

/// Whether this build can run cross-encoder inference at all.
#[must_use]
pub const fn is_semantic_runtime_available() -> bool {
    cfg!(feature = "semantic-ort")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Cross-encoder running on ONNX Runtime.
pub struct OnnxCrossEncoder {
    model_id: String,
    #[cfg(feature = "semantic-ort")]
    session: Mutex<Session>,
    #[cfg(feature = "semantic-ort")]
    tokenizer: Tokenizer,
    #[cfg(feature = "semantic-ort")]
    max_length: usize,
}

impl OnnxCrossEncoder {
    /// Load `model.onnx` and `tokenizer.json` for `model_id`.
    ///
    /// # Errors
    ///
    /// Fails when the files are missing, the checksum does not match, or the
    /// ONNX runtime was not compiled in.
    pub fn load(model_id: &str, config: &RerankConfig) -> Result<Self> {
        let dir = model_dir(model_id, config)?;
        let model_path = dir.join(MODEL_FILENAME);
        let tokenizer_path = dir.join(TOKENIZER_FILENAME);

        #[cfg(feature = "semantic-ort")]
        {
            if !model_path.exists() || !tokenizer_path.exists() {
                bail!(
                    "reranker model '{model_id}' not found: expected {MODEL_FILENAME} and {TOKENIZER_FILENAME} in {}",
                    dir.display()
                );
            }
            if let Some(expected) = &config.model_sha256 {
                verify_model_checksum(&model_path, expected)?;
            }

            let session = Session::builder()
                .context("failed to create ONNX Runtime session builder")?
                .commit_from_file(&model_path)
                .with_context(|| {
                    format!("failed to load reranker model from {}", model_path.display())
                })?;
            let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
                anyhow!("failed to load tokenizer {}: {e}", tokenizer_path.display())
            })?;

            tracing::debug!(model = model_id, path = %model_path.display(), "reranker model loaded");
            return Ok(Self {
                model_id: model_id.to_string(),
                session: Mutex::new(session),
                tokenizer,
                max_length: config.max_length.max(2),
            });
        }

        #[cfg(not(feature = "semantic-ort"))]
        {
            let _ = (model_path, tokenizer_path);
            bail!("semantic runtime unavailable: compile coderag-search with `semantic-ort`");
        }
    }

    #[cfg(feature = "semantic-ort")]
    fn score_pair(&self, query: &str, passage: &str) -> Result<f32> {
        let encoding = self
            .tokenizer
            .encode((query, passage), true)
            .map_err(|e| anyhow!("failed to tokenize pair: {e}"))?;

        let len = encoding.get_ids().len().min(self.max_length);
        let to_i64 = |values: &[u32]| -> Vec<i64> {
            values.iter().take(len).map(|&v| i64::from(v)).collect()
        };
        let shape = vec![1_i64, i64::try_from(len).context("sequence too long")?];

        let ids = Tensor::from_array((shape.clone(), to_i64(encoding.get_ids())))
            .context("failed to build input_ids tensor")?;
        let mask = Tensor::from_array((shape.clone(), to_i64(encoding.get_attention_mask())))
            .context("failed to build attention_mask tensor")?;

        let mut session = self.session.lock();
        let outputs = if session.inputs.len() >= 3 {
            let type_ids = Tensor::from_array((shape, to_i64(encoding.get_type_ids())))
                .context("failed to build token_type_ids tensor")?;
            session.run(ort::inputs![ids, mask, type_ids])
        } else {
            session.run(ort::inputs![ids, mask])
        }
        .context("cross-encoder inference failed")?;

        let (_name, output) = outputs
            .iter()
            .next()
            .context("cross-encoder produced no output tensor")?;
        let (_shape, logits) = output
            .try_extract_tensor::<f32>()
            .context("failed to read cross-encoder logits")?;

        // Single-logit heads score relevance directly; two-class heads put the
        // relevant class last.
        let logit = *logits.last().context("cross-encoder produced empty logits")?;
        Ok(sigmoid(logit))
    }
}

impl CrossEncoder for OnnxCrossEncoder {
    fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        #[cfg(feature = "semantic-ort")]
        {
            passages
                .iter()
                .map(|passage| self.score_pair(query, passage))
                .collect()
        }

        #[cfg(not(feature = "semantic-ort"))]
        {
            let _ = (query, passages);
            bail!("semantic runtime unavailable: compile coderag-search with `semantic-ort`");
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(feature = "semantic-ort")]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
