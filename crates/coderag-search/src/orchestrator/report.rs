use coderag_core::model::FusedResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How `hybrid_retrieve` refines vector candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMethod {
    /// Raw vector order.
    None,
    /// BM25 over the candidates, fused with the vector scores.
    #[default]
    Lexical,
    /// Cross-encoder rerank of the candidates.
    Semantic,
    /// Vector and full-text fan-out, fused, optionally cross-encoder reranked.
    Fused,
}

impl RerankMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Fused => "fused",
        }
    }
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call knobs for [`super::RetrievalOrchestrator::hybrid_retrieve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridOptions {
    pub top_k: usize,
    pub use_rerank: bool,
    pub rerank_method: RerankMethod,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            use_rerank: true,
            rerank_method: RerankMethod::Lexical,
        }
    }
}

impl HybridOptions {
    /// Lexical rerank of `top_k` results.
    #[must_use]
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_method(mut self, method: RerankMethod) -> Self {
        self.rerank_method = method;
        self
    }

    #[must_use]
    pub const fn with_rerank(mut self, use_rerank: bool) -> Self {
        self.use_rerank = use_rerank;
        self
    }
}

/// Per-query lifecycle checkpoints, recorded in the order they were reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Received,
    /// Sources queried concurrently.
    Fanout,
    /// Sources queried one after another.
    Sequential,
    Fused,
    Reranked,
    SkipRerank,
    Returned,
}

/// A fallback taken while answering a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// `"vector"`, `"fulltext"` or `"semantic_rerank"`.
    pub component: String,
    pub reason: String,
}

impl Degradation {
    pub fn new(component: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            component: component.into(),
            reason: reason.to_string(),
        }
    }
}

/// Results of one hybrid query together with how they were produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalReport {
    pub results: Vec<FusedResult>,
    pub stages: Vec<QueryStage>,
    pub degradations: Vec<Degradation>,
}

impl RetrievalReport {
    pub(crate) fn enter(&mut self, stage: QueryStage) {
        tracing::debug!(?stage, "query stage");
        self.stages.push(stage);
    }

    pub(crate) fn degrade(&mut self, degradation: Degradation) {
        tracing::warn!(
            component = %degradation.component,
            reason = %degradation.reason,
            "retrieval degraded"
        );
        self.degradations.push(degradation);
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    #[must_use]
    pub fn reached(&self, stage: QueryStage) -> bool {
        self.stages.contains(&stage)
    }
}

/// Outcome of the mirrored full-text write in [`super::RetrievalOrchestrator::add`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulltextWrite {
    Disabled,
    Written(usize),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub vector_written: usize,
    pub fulltext: FulltextWrite,
}

impl AddReport {
    /// The vector write succeeded but the full-text mirror did not.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self.fulltext, FulltextWrite::Failed(_))
    }
}

/// Document counts per index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub vector_backend: String,
    pub vector_documents: usize,
    /// `None` when full-text search is disabled.
    pub fulltext_backend: Option<String>,
    pub fulltext_documents: Option<usize>,
    pub semantic_rerank_loaded: bool,
}
