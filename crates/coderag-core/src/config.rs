use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::SourceWeights;

/// Project-level configuration read from `.coderag/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoderagConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default = "default_half")]
    pub vector_weight: f32,
    #[serde(default = "default_half")]
    pub fulltext_weight: f32,
    /// Vector candidates fetched per requested result before rerank/fusion.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default)]
    pub enable_fulltext: bool,
    #[serde(default = "default_true")]
    pub enable_parallel: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f32,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: 0.0,
            vector_weight: default_half(),
            fulltext_weight: default_half(),
            overfetch_factor: default_overfetch_factor(),
            enable_fulltext: false,
            enable_parallel: default_true(),
            max_workers: default_max_workers(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

impl RetrievalConfig {
    /// Normalized fusion weights.
    #[must_use]
    pub fn weights(&self) -> SourceWeights {
        SourceWeights::new(self.vector_weight, self.fulltext_weight)
    }

    /// Number of vector candidates to request for `top_k` results.
    #[must_use]
    pub fn candidate_count(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.overfetch_factor.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub enable_semantic_rerank: bool,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    /// Directory holding `model.onnx` and `tokenizer.json`. Defaults to the
    /// OS cache dir.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    /// Expected SHA-256 of `model.onnx`, hex encoded.
    #[serde(default)]
    pub model_sha256: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enable_semantic_rerank: false,
            model: default_rerank_model(),
            model_dir: None,
            model_sha256: None,
            max_length: default_max_length(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Flat,
    Sqlite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulltextBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub vector_backend: VectorBackend,
    #[serde(default)]
    pub fulltext_backend: FulltextBackend,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Where SQLite backends keep their files. Relative paths resolve against
    /// the project root.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vector_backend: VectorBackend::default(),
            fulltext_backend: FulltextBackend::default(),
            embedding_dim: default_embedding_dim(),
            index_dir: None,
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn resolve_index_dir(&self, project_root: &Path) -> PathBuf {
        match &self.index_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_root.join(dir),
            None => project_root.join(".coderag/index"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl CoderagConfig {
    /// Load `<project_root>/.coderag/config.toml` and apply `CODERAG_*`
    /// environment overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut config = load_project_config(project_root)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup. Unparseable values are logged and
    /// ignored so a stray variable cannot take the service down.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = &mut self.retrieval;
        override_parsed(&lookup, "CODERAG_TOP_K", &mut r.top_k);
        override_parsed(&lookup, "CODERAG_MIN_SIMILARITY", &mut r.min_similarity);
        override_parsed(&lookup, "CODERAG_VECTOR_WEIGHT", &mut r.vector_weight);
        override_parsed(&lookup, "CODERAG_FULLTEXT_WEIGHT", &mut r.fulltext_weight);
        override_parsed(&lookup, "CODERAG_OVERFETCH_FACTOR", &mut r.overfetch_factor);
        override_bool(&lookup, "CODERAG_ENABLE_FULLTEXT", &mut r.enable_fulltext);
        override_bool(&lookup, "CODERAG_ENABLE_PARALLEL", &mut r.enable_parallel);
        override_parsed(&lookup, "CODERAG_MAX_WORKERS", &mut r.max_workers);

        let rr = &mut self.rerank;
        override_bool(
            &lookup,
            "CODERAG_ENABLE_SEMANTIC_RERANK",
            &mut rr.enable_semantic_rerank,
        );
        if let Some(model) = lookup("CODERAG_RERANKER_MODEL").filter(|m| !m.trim().is_empty()) {
            rr.model = model.trim().to_string();
        }
        if let Some(dir) = lookup("CODERAG_RERANKER_MODEL_DIR").filter(|d| !d.trim().is_empty()) {
            rr.model_dir = Some(PathBuf::from(dir.trim()));
        }

        override_parsed(&lookup, "CODERAG_EMBEDDING_DIM", &mut self.index.embedding_dim);
        if let Some(dir) = lookup("CODERAG_INDEX_DIR").filter(|d| !d.trim().is_empty()) {
            self.index.index_dir = Some(PathBuf::from(dir.trim()));
        }

        if let Some(format) = lookup("CODERAG_LOG_FORMAT") {
            match format.trim().to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "compact" | "text" => self.logging.format = LogFormat::Compact,
                other => warn!(value = other, "ignoring unknown CODERAG_LOG_FORMAT"),
            }
        }
    }
}

/// Read `.coderag/config.toml` without environment overrides.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<CoderagConfig> {
    let path = project_root.join(".coderag/config.toml");
    if !path.exists() {
        return Ok(CoderagConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<CoderagConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}

fn override_bool<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        _ => warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}

const fn default_true() -> bool {
    true
}

const fn default_top_k() -> usize {
    5
}

const fn default_half() -> f32 {
    0.5
}

const fn default_overfetch_factor() -> usize {
    2
}

const fn default_max_workers() -> usize {
    2
}

const fn default_bm25_k1() -> f32 {
    1.5
}

const fn default_bm25_b() -> f32 {
    0.75
}

fn default_rerank_model() -> String {
    "BAAI/bge-reranker-v2-m3".to_string()
}

const fn default_max_length() -> usize {
    512
}

const fn default_embedding_dim() -> usize {
    384
}

fn default_log_level() -> String {
    "info".to_string()
}
