use coderag_core::config::RerankConfig;
use coderag_core::error::RetrievalError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::model::{OnnxCrossEncoder, resolve_reranker_model};
use super::{CrossEncoder, Rerankable};

enum Backend {
    Ready(Arc<dyn CrossEncoder>),
    Unavailable(String),
}

/// Reorders candidates by cross-encoder relevance.
///
/// Scoring failures surface as [`RetrievalError::RerankUnavailable`] so the
/// caller can fall back to a cheaper rerank; they are never swallowed.
pub struct SemanticReranker {
    model_id: String,
    backend: Backend,
}

impl fmt::Debug for SemanticReranker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticReranker")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl SemanticReranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            model_id: encoder.model_id().to_string(),
            backend: Backend::Ready(encoder),
        }
    }

    /// A reranker that failed to load. Every scoring call returns
    /// `RerankUnavailable` carrying `reason`.
    pub fn unavailable(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            backend: Backend::Unavailable(reason.into()),
        }
    }

    /// Load the ONNX cross-encoder for `model_id` (aliases accepted).
    ///
    /// # Errors
    ///
    /// `RerankUnavailable` when the model or runtime is missing.
    pub fn load(model_id: &str, config: &RerankConfig) -> Result<Self, RetrievalError> {
        let model_id = resolve_reranker_model(model_id);
        OnnxCrossEncoder::load(model_id, config)
            .map(|encoder| Self::new(Arc::new(encoder)))
            .map_err(|e| RetrievalError::rerank_unavailable(format!("{model_id}: {e:#}")))
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self.backend, Backend::Ready(_))
    }

    /// Raw relevance scores, one per passage, in input order.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for blank passages; `RerankUnavailable` when scoring
    /// fails, returns the wrong number of scores, or returns non-finite values.
    pub fn compute_scores(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RetrievalError> {
        if let Some(idx) = passages.iter().position(|p| p.trim().is_empty()) {
            return Err(RetrievalError::invalid_input(format!(
                "rerank candidate {idx} has empty content"
            )));
        }
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let encoder = match &self.backend {
            Backend::Ready(encoder) => encoder,
            Backend::Unavailable(reason) => {
                return Err(RetrievalError::rerank_unavailable(reason));
            }
        };

        let scores = encoder
            .score_pairs(query, passages)
            .map_err(|e| RetrievalError::rerank_unavailable(format!("{e:#}")))?;
        if scores.len() != passages.len() {
            return Err(RetrievalError::rerank_unavailable(format!(
                "cross-encoder returned {} scores for {} passages",
                scores.len(),
                passages.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(RetrievalError::rerank_unavailable(
                "cross-encoder returned a non-finite score",
            ));
        }
        Ok(scores)
    }

    /// Score every item against `query`, sort best first (stable), rank from
    /// 1 and truncate to `top_k`. With `return_scores == false` items that
    /// keep a separate rerank score have it cleared.
    ///
    /// # Errors
    ///
    /// See [`SemanticReranker::compute_scores`].
    #[instrument(skip(self, items), fields(model = %self.model_id, candidates = items.len()))]
    pub fn rerank<T: Rerankable>(
        &self,
        query: &str,
        items: Vec<T>,
        top_k: Option<usize>,
        return_scores: bool,
    ) -> Result<Vec<T>, RetrievalError> {
        let scores = {
            let passages: Vec<&str> = items.iter().map(Rerankable::content).collect();
            self.compute_scores(query, &passages)?
        };

        let mut scored: Vec<(f32, T)> = scores.into_iter().zip(items).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        if let Some(k) = top_k {
            scored.truncate(k);
        }

        let reranked: Vec<T> = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (score, mut item))| {
                item.apply_rerank(score, idx + 1);
                if !return_scores {
                    item.clear_rerank_score();
                }
                item
            })
            .collect();
        debug!(returned = reranked.len(), "semantic rerank complete");
        Ok(reranked)
    }

    /// Run one throwaway scoring pass so the first real query does not pay
    /// session start-up cost.
    ///
    /// # Errors
    ///
    /// Whatever the scoring pass returned. Later calls are unaffected.
    pub fn warmup(&self) -> Result<(), RetrievalError> {
        self.compute_scores("warmup query", &["warmup document"])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderag_core::model::{Document, FusedResult, ScoredHit, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores a passage by how many query words it contains.
    struct OverlapEncoder {
        calls: AtomicUsize,
    }

    impl OverlapEncoder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CrossEncoder for OverlapEncoder {
        fn score_pairs(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(passages
                .iter()
                .map(|p| query.split_whitespace().filter(|w| p.contains(w)).count() as f32)
                .collect())
        }

        fn model_id(&self) -> &str {
            "test/overlap"
        }
    }

    struct BrokenEncoder(Vec<f32>);

    impl CrossEncoder for BrokenEncoder {
        fn score_pairs(&self, _query: &str, _passages: &[&str]) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn model_id(&self) -> &str {
            "test/broken"
        }
    }

    fn hit(id: &str, content: &str, score: f32) -> ScoredHit {
        ScoredHit::new(Document::new(id, format!("{id}.rs"), content), score, 0)
    }

    fn ids(hits: &[ScoredHit]) -> Vec<&str> {
        hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    #[test]
    fn reranks_by_encoder_score() {
        let reranker = SemanticReranker::new(Arc::new(OverlapEncoder::new()));
        let items = vec![
            hit("a", "unrelated text", 0.9),
            hit("b", "retry http request", 0.5),
            hit("c", "retry once", 0.1),
        ];
        let out = reranker
            .rerank("retry http request", items, Some(2), true)
            .expect("rerank");
        assert_eq!(ids(&out), vec!["b", "c"]);
        assert_eq!(out[0].rank, 1);
        assert!((out[0].score - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let reranker = SemanticReranker::new(Arc::new(OverlapEncoder::new()));
        let items = vec![hit("x", "same", 0.0), hit("y", "same", 0.0), hit("z", "same", 0.0)];
        let out = reranker.rerank("same", items, None, true).expect("rerank");
        assert_eq!(ids(&out), vec!["x", "y", "z"]);
    }

    #[test]
    fn fused_results_keep_sources_and_record_rerank_score() {
        let reranker = SemanticReranker::new(Arc::new(OverlapEncoder::new()));
        let doc = Document::new("a", "a.rs", "open file handle");
        let mut item = FusedResult::single(doc, Source::Vector, 1.0, 0.5);
        item.sources.insert(Source::Fulltext);

        let out = reranker
            .rerank("open file", vec![item.clone()], None, true)
            .expect("rerank");
        assert_eq!(out[0].sources, item.sources);
        assert_eq!(out[0].rerank_score, Some(2.0));
        assert!((out[0].combined_score - 2.0).abs() < f32::EPSILON);

        let hidden = reranker
            .rerank("open file", vec![item], None, false)
            .expect("rerank");
        assert_eq!(hidden[0].rerank_score, None);
    }

    #[test]
    fn blank_content_is_invalid_input() {
        let reranker = SemanticReranker::new(Arc::new(OverlapEncoder::new()));
        let err = reranker
            .rerank("q", vec![hit("a", "  ", 0.0)], None, true)
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn empty_candidates_skip_the_encoder() {
        let encoder = Arc::new(OverlapEncoder::new());
        let reranker = SemanticReranker::new(encoder.clone());
        let out = reranker
            .rerank::<ScoredHit>("q", Vec::new(), None, true)
            .expect("rerank");
        assert!(out.is_empty());
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bad_encoder_output_is_rerank_unavailable() {
        let short = SemanticReranker::new(Arc::new(BrokenEncoder(vec![1.0])));
        let err = short.compute_scores("q", &["a", "b"]).unwrap_err();
        assert!(matches!(err, RetrievalError::RerankUnavailable(_)));

        let nan = SemanticReranker::new(Arc::new(BrokenEncoder(vec![f32::NAN])));
        assert!(nan.compute_scores("q", &["a"]).unwrap_err().is_recoverable());
    }

    #[test]
    fn unavailable_reranker_reports_reason() {
        let reranker = SemanticReranker::unavailable("BAAI/bge-reranker-v2-m3", "model missing");
        assert!(!reranker.is_loaded());
        assert_eq!(
            reranker.warmup().unwrap_err(),
            RetrievalError::RerankUnavailable("model missing".into())
        );
    }

    #[test]
    fn warmup_runs_one_pass() {
        let encoder = Arc::new(OverlapEncoder::new());
        let reranker = SemanticReranker::new(encoder.clone());
        reranker.warmup().expect("warmup");
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert!(reranker.is_loaded());
    }

    #[cfg(not(feature = "semantic-ort"))]
    #[test]
    fn load_without_runtime_is_rerank_unavailable() {
        let err = SemanticReranker::load("bge-reranker-base", &RerankConfig::default()).unwrap_err();
        assert!(matches!(err, RetrievalError::RerankUnavailable(_)));
        assert!(err.to_string().contains("BAAI/bge-reranker-base"));
    }
}
