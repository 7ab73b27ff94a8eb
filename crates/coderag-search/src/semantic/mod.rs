//! Cross-encoder semantic rerank.

mod model;
mod reranker;

pub use model::{
    OnnxCrossEncoder, is_semantic_runtime_available, model_dir, resolve_reranker_model,
    verify_model_checksum,
};
pub use reranker::SemanticReranker;

use anyhow::Result;
use coderag_core::model::{FusedResult, ScoredHit};

/// Scores (query, passage) pairs. Higher is more relevant.
///
/// Implementations must return exactly one score per passage.
pub trait CrossEncoder: Send + Sync {
    fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;

    /// Model identifier, for logs.
    fn model_id(&self) -> &str;
}

/// An item a [`SemanticReranker`] can reorder.
pub trait Rerankable {
    fn content(&self) -> &str;

    /// Record the rerank score and new 1-based rank.
    fn apply_rerank(&mut self, score: f32, rank: usize);

    /// Drop a stored rerank score, when the item keeps one separately.
    fn clear_rerank_score(&mut self) {}
}

impl Rerankable for ScoredHit {
    fn content(&self) -> &str {
        &self.document.content
    }

    fn apply_rerank(&mut self, score: f32, rank: usize) {
        self.score = score;
        self.rank = rank;
    }
}

impl Rerankable for FusedResult {
    fn content(&self) -> &str {
        &self.document.content
    }

    fn apply_rerank(&mut self, score: f32, rank: usize) {
        self.rerank_score = Some(score);
        self.combined_score = score;
        self.rank = rank;
    }

    fn clear_rerank_score(&mut self) {
        self.rerank_score = None;
    }
}
