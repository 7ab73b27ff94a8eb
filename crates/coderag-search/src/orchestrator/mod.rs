//! Query orchestration across vector, full-text and rerank stages.
//!
//! The orchestrator degrades rather than fails where it can:
//! - a failing source in the fused fan-out contributes an empty list, and the
//!   query only fails when every source does
//! - semantic rerank falls back to lexical rerank when the cross-encoder is
//!   missing or errors
//!
//! Every fallback is recorded as a [`Degradation`] on the [`RetrievalReport`]
//! and logged at `warn`.

mod pool;
mod report;

pub use report::{
    AddReport, Degradation, FulltextWrite, HybridOptions, IndexStats, QueryStage, RerankMethod,
    RetrievalReport,
};

use anyhow::Context;
use coderag_core::config::CoderagConfig;
use coderag_core::config::RetrievalConfig;
use coderag_core::error::RetrievalError;
use coderag_core::model::{
    Document, FusedResult, HitFilter, ScoredHit, Source, VectorPoint, assign_ranks,
};
use coderag_core::state::IndexStateStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::fusion::ScoreFusionEngine;
use crate::fusion::scoring::single_source;
use crate::index::{
    FullTextIndex, SuggestField, VectorIndex, open_fulltext_index, open_vector_index,
};
use crate::lexical::{Bm25Params, LexicalScorer};
use crate::semantic::SemanticReranker;
use pool::FanoutPool;

const VECTOR: &str = "vector";
const FULLTEXT: &str = "fulltext";
const SEMANTIC_RERANK: &str = "semantic_rerank";

/// Entry point for retrieval: owns the index handles, the optional reranker
/// and the fusion settings. Holds no per-query state.
pub struct RetrievalOrchestrator {
    vector: Arc<dyn VectorIndex>,
    fulltext: Option<Arc<dyn FullTextIndex>>,
    reranker: Option<SemanticReranker>,
    config: RetrievalConfig,
    fusion: ScoreFusionEngine,
    pool: FanoutPool,
}

impl std::fmt::Debug for RetrievalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOrchestrator")
            .field("vector", &self.vector.name())
            .field("fulltext", &self.fulltext.as_ref().map(|i| i.name()))
            .field("reranker", &self.reranker)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetrievalOrchestrator {
    /// Vector-only orchestrator. Attach a full-text index with
    /// [`Self::with_fulltext`] and a reranker with [`Self::with_reranker`].
    pub fn new(vector: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        let fusion =
            ScoreFusionEngine::new(config.weights()).with_min_similarity(config.min_similarity);
        let pool = FanoutPool::new(config.enable_parallel, config.max_workers);
        let bm25 = Bm25Params {
            k1: config.bm25_k1,
            b: config.bm25_b,
        };
        if !bm25.is_valid() {
            warn!(
                k1 = config.bm25_k1,
                b = config.bm25_b,
                "BM25 parameters out of range, using {:?}",
                bm25.sanitized()
            );
        }
        Self {
            vector,
            fulltext: None,
            reranker: None,
            config,
            fusion,
            pool,
        }
    }

    /// Attach a full-text index. It is only consulted when
    /// `enable_fulltext` is set in the retrieval config.
    #[must_use]
    pub fn with_fulltext(mut self, index: Arc<dyn FullTextIndex>) -> Self {
        self.fulltext = Some(index);
        self
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: SemanticReranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build indexes and reranker from a loaded config.
    ///
    /// A reranker that fails to load is kept in its unavailable state, so
    /// semantic requests degrade to lexical rerank instead of failing here.
    ///
    /// # Errors
    ///
    /// Fails when a configured SQLite index cannot be opened.
    pub fn from_config(config: &CoderagConfig, project_root: &Path) -> anyhow::Result<Self> {
        let vector = open_vector_index(&config.index, project_root)
            .context("Failed to open vector index")?;
        let mut orchestrator = Self::new(vector, config.retrieval.clone());

        if config.retrieval.enable_fulltext {
            let fulltext = open_fulltext_index(&config.index, orchestrator.bm25_params(), project_root)
                .context("Failed to open full-text index")?;
            orchestrator = orchestrator.with_fulltext(fulltext);
        }

        if config.rerank.enable_semantic_rerank {
            let reranker = SemanticReranker::load(&config.rerank.model, &config.rerank)
                .unwrap_or_else(|e| {
                    warn!("semantic reranker unavailable, lexical rerank will be used: {e}");
                    SemanticReranker::unavailable(&config.rerank.model, e.to_string())
                });
            orchestrator = orchestrator.with_reranker(reranker);
        }

        info!(
            vector = orchestrator.vector.name(),
            fulltext = orchestrator.fulltext().map(|i| i.name()),
            semantic = orchestrator.reranker.as_ref().is_some_and(SemanticReranker::is_loaded),
            "retrieval orchestrator ready"
        );
        Ok(orchestrator)
    }

    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[must_use]
    pub const fn fusion(&self) -> &ScoreFusionEngine {
        &self.fusion
    }

    #[must_use]
    pub fn has_fulltext(&self) -> bool {
        self.fulltext().is_some()
    }

    #[must_use]
    pub const fn reranker(&self) -> Option<&SemanticReranker> {
        self.reranker.as_ref()
    }

    fn fulltext(&self) -> Option<&Arc<dyn FullTextIndex>> {
        if self.config.enable_fulltext {
            self.fulltext.as_ref()
        } else {
            None
        }
    }

    fn require_fulltext(&self) -> Result<&Arc<dyn FullTextIndex>, RetrievalError> {
        self.fulltext()
            .ok_or(RetrievalError::FeatureDisabled("full-text search"))
    }

    fn bm25_params(&self) -> Bm25Params {
        Bm25Params::new(self.config.bm25_k1, self.config.bm25_b)
    }

    /// Plain vector search: up to `top_k` hits, ranked from 1.
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when the vector index fails; `InvalidInput` for a
    /// query embedding the index rejects.
    #[instrument(skip(self, embedding), fields(dim = embedding.len()))]
    pub fn retrieve(
        &self,
        query: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredHit>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self
            .vector
            .search(embedding, top_k)
            .map_err(|e| index_error(VECTOR, &e))?;
        hits.truncate(top_k);
        assign_ranks(&mut hits);
        debug!(returned = hits.len(), "vector retrieve complete");
        Ok(hits)
    }

    /// Hybrid retrieval; see [`Self::hybrid_retrieve_report`].
    ///
    /// # Errors
    ///
    /// See [`Self::hybrid_retrieve_report`].
    pub fn hybrid_retrieve(
        &self,
        query: &str,
        embedding: &[f32],
        options: &HybridOptions,
    ) -> Result<Vec<FusedResult>, RetrievalError> {
        self.hybrid_retrieve_report(query, embedding, options)
            .map(|report| report.results)
    }

    /// Hybrid retrieval with the stages reached and any fallbacks taken.
    ///
    /// Fetches `overfetch_factor * top_k` vector candidates, then refines them
    /// according to `options.rerank_method`.
    ///
    /// # Errors
    ///
    /// Outside the fused path, the vector error as mapped (`IndexUnavailable`
    /// or `InvalidInput`). In the fused path, the vector error when every
    /// source fails. `InvalidInput` from the semantic reranker is returned
    /// on every path.
    #[instrument(
        skip(self, embedding, options),
        fields(top_k = options.top_k, method = %options.rerank_method, rerank = options.use_rerank)
    )]
    pub fn hybrid_retrieve_report(
        &self,
        query: &str,
        embedding: &[f32],
        options: &HybridOptions,
    ) -> Result<RetrievalReport, RetrievalError> {
        let mut report = RetrievalReport::default();
        report.enter(QueryStage::Received);

        if options.top_k > 0 {
            report.results = if options.rerank_method == RerankMethod::Fused {
                self.fused_path(query, embedding, options, &mut report)?
            } else {
                self.vector_path(query, embedding, options, &mut report)?
            };
        }

        report.enter(QueryStage::Returned);
        debug!(
            returned = report.results.len(),
            degraded = report.is_degraded(),
            "hybrid retrieve complete"
        );
        Ok(report)
    }

    fn vector_path(
        &self,
        query: &str,
        embedding: &[f32],
        options: &HybridOptions,
        report: &mut RetrievalReport,
    ) -> Result<Vec<FusedResult>, RetrievalError> {
        let top_k = options.top_k;
        report.enter(QueryStage::Sequential);
        let candidates = self
            .vector
            .search(embedding, self.config.candidate_count(top_k))
            .map_err(|e| index_error(VECTOR, &e))?;
        debug!(candidates = candidates.len(), "vector candidates fetched");

        let method = if options.use_rerank {
            options.rerank_method
        } else {
            RerankMethod::None
        };
        match method {
            RerankMethod::Semantic => self.semantic_or_lexical(query, candidates, top_k, report),
            RerankMethod::Lexical => {
                let results = self.lexical_rerank(query, candidates, top_k);
                report.enter(QueryStage::Fused);
                report.enter(QueryStage::Reranked);
                Ok(results)
            }
            RerankMethod::None | RerankMethod::Fused => {
                report.enter(QueryStage::Fused);
                report.enter(QueryStage::SkipRerank);
                Ok(vector_only(candidates, top_k))
            }
        }
    }

    fn semantic_or_lexical(
        &self,
        query: &str,
        candidates: Vec<ScoredHit>,
        top_k: usize,
        report: &mut RetrievalReport,
    ) -> Result<Vec<FusedResult>, RetrievalError> {
        report.enter(QueryStage::Fused);
        let failure = match &self.reranker {
            Some(reranker) => {
                let items = single_source(Source::Vector, candidates.clone());
                match reranker.rerank(query, items, Some(top_k), true) {
                    Ok(results) => {
                        report.enter(QueryStage::Reranked);
                        return Ok(results);
                    }
                    Err(e) if e.is_recoverable() => e.to_string(),
                    Err(e) => return Err(e),
                }
            }
            None => "no semantic reranker configured".to_string(),
        };

        report.degrade(Degradation::new(
            SEMANTIC_RERANK,
            format!("{failure}; using lexical rerank"),
        ));
        let results = self.lexical_rerank(query, candidates, top_k);
        report.enter(QueryStage::Reranked);
        Ok(results)
    }

    /// BM25 over the candidate set itself, fused with the vector scores.
    fn lexical_rerank(&self, query: &str, candidates: Vec<ScoredHit>, top_k: usize) -> Vec<FusedResult> {
        let documents: Vec<Document> = candidates.iter().map(|h| h.document.clone()).collect();
        let mut scorer = LexicalScorer::new(self.bm25_params());
        scorer.index(&documents);

        let mut lexical = scorer.rerank(query, &documents, documents.len());
        lexical.retain(|hit| hit.score > 0.0);
        assign_ranks(&mut lexical);

        ScoreFusionEngine::new(self.config.weights())
            .fuse(vec![(Source::Vector, candidates), (Source::Lexical, lexical)], top_k)
    }

    fn fused_path(
        &self,
        query: &str,
        embedding: &[f32],
        options: &HybridOptions,
        report: &mut RetrievalReport,
    ) -> Result<Vec<FusedResult>, RetrievalError> {
        let top_k = options.top_k;
        let fetch = self.config.candidate_count(top_k);
        let semantic = options
            .use_rerank
            .then_some(self.reranker.as_ref())
            .flatten();

        let Some(fulltext) = self.fulltext() else {
            report.degrade(Degradation::new(
                FULLTEXT,
                "full-text search disabled; fusing vector results only",
            ));
            report.enter(QueryStage::Sequential);
            let hits = self
                .vector
                .search(embedding, fetch)
                .map_err(|e| index_error(VECTOR, &e))?;
            let fused = self.fusion.fuse(vec![(Source::Vector, hits)], fetch);
            report.enter(QueryStage::Fused);
            return Self::rerank_fused(query, fused, top_k, semantic, report);
        };

        report.enter(if self.pool.is_parallel() {
            QueryStage::Fanout
        } else {
            QueryStage::Sequential
        });
        let vector = &self.vector;
        let (vector_result, fulltext_result) = self.pool.join(
            || vector.search(embedding, fetch),
            || fulltext.search(query, fetch),
        );

        let mut lists = Vec::with_capacity(2);
        let mut failures = Vec::new();
        for (source, component, result) in [
            (Source::Vector, VECTOR, vector_result),
            (Source::Fulltext, FULLTEXT, fulltext_result),
        ] {
            match result {
                Ok(hits) => lists.push((source, hits)),
                Err(e) => {
                    let err = index_error(component, &e);
                    report.degrade(Degradation::new(component, &err));
                    failures.push(err);
                    lists.push((source, Vec::new()));
                }
            }
        }
        if failures.len() == lists.len() {
            return Err(failures.swap_remove(0));
        }

        let fused = self.fusion.fuse(lists, fetch);
        report.enter(QueryStage::Fused);
        Self::rerank_fused(query, fused, top_k, semantic, report)
    }

    fn rerank_fused(
        query: &str,
        mut fused: Vec<FusedResult>,
        top_k: usize,
        semantic: Option<&SemanticReranker>,
        report: &mut RetrievalReport,
    ) -> Result<Vec<FusedResult>, RetrievalError> {
        if let Some(reranker) = semantic {
            match reranker.rerank(query, fused.clone(), Some(top_k), true) {
                Ok(reranked) => {
                    report.enter(QueryStage::Reranked);
                    return Ok(reranked);
                }
                Err(e) if e.is_recoverable() => {
                    report.degrade(Degradation::new(
                        SEMANTIC_RERANK,
                        format!("{e}; keeping fused order"),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        report.enter(QueryStage::SkipRerank);
        fused.truncate(top_k);
        Ok(fused)
    }

    /// Full-text search without fusion.
    ///
    /// # Errors
    ///
    /// `FeatureDisabled` when full-text search is off; `IndexUnavailable` when
    /// the index fails.
    #[instrument(skip(self))]
    pub fn fulltext_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredHit>, RetrievalError> {
        self.require_fulltext()?
            .search(query, top_k)
            .map_err(|e| index_error(FULLTEXT, &e))
    }

    /// Full-text search restricted by path prefix and/or structure type.
    ///
    /// # Errors
    ///
    /// See [`Self::fulltext_search`].
    #[instrument(skip(self))]
    pub fn fulltext_search_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: &HitFilter,
    ) -> Result<Vec<ScoredHit>, RetrievalError> {
        self.require_fulltext()?
            .search_filtered(query, top_k, filter)
            .map_err(|e| index_error(FULLTEXT, &e))
    }

    /// Distinct stored values of `field` starting with `prefix`, compared
    /// case-insensitively, in indexing order. Blank prefix gives nothing.
    ///
    /// # Errors
    ///
    /// `FeatureDisabled` when full-text search is off; `IndexUnavailable` when
    /// the index fails.
    pub fn suggest(
        &self,
        prefix: &str,
        field: SuggestField,
        limit: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        self.require_fulltext()?
            .suggest(prefix, field, limit)
            .map_err(|e| index_error(FULLTEXT, &e))
    }

    /// Upsert points into the vector index and mirror their documents into
    /// the full-text index when enabled.
    ///
    /// Both writes are attempted. A full-text failure is logged and reported
    /// in [`AddReport::fulltext`]; nothing is rolled back.
    ///
    /// # Errors
    ///
    /// `InvalidInput` before any write when a document is malformed;
    /// `IndexUnavailable` when the vector write fails.
    #[instrument(skip(self, points), fields(points = points.len()))]
    pub fn add(&self, points: &[VectorPoint]) -> Result<AddReport, RetrievalError> {
        for point in points {
            point.document.validate()?;
        }

        let vector_result = self
            .vector
            .add(points)
            .map_err(|e| index_error(VECTOR, &e));

        let fulltext = self.mirror_to_fulltext(points);

        let vector_written = vector_result?;
        debug!(vector_written, ?fulltext, "documents added");
        Ok(AddReport {
            vector_written,
            fulltext,
        })
    }

    fn mirror_to_fulltext(&self, points: &[VectorPoint]) -> FulltextWrite {
        let Some(index) = self.fulltext() else {
            return FulltextWrite::Disabled;
        };
        let documents: Vec<Document> = points.iter().map(|p| p.document.clone()).collect();
        match index.add(&documents) {
            Ok(written) => FulltextWrite::Written(written),
            Err(e) => {
                let err = index_error(FULLTEXT, &e);
                warn!("full-text mirror write failed, vector write kept: {err}");
                FulltextWrite::Failed(err.to_string())
            }
        }
    }

    /// [`Self::add`] for a registered source, driving its indexing state
    /// `indexing -> completed | failed`.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidStateTransition` from the store, or the error
    /// `add` returned (after the source is marked failed).
    pub fn add_tracked(
        &self,
        source_id: &str,
        points: &[VectorPoint],
        states: &mut IndexStateStore,
    ) -> Result<AddReport, RetrievalError> {
        states.start_indexing(source_id)?;
        match self.add(points) {
            Ok(report) => {
                states.complete(source_id, report.vector_written)?;
                Ok(report)
            }
            Err(e) => {
                states.fail(source_id, e.to_string())?;
                Err(e)
            }
        }
    }

    /// Remove a document from the full-text index by identity key.
    ///
    /// # Errors
    ///
    /// `FeatureDisabled` when full-text search is off; `IndexUnavailable` when
    /// the index fails.
    pub fn delete(&self, id: &str) -> Result<bool, RetrievalError> {
        self.require_fulltext()?
            .delete(id)
            .map_err(|e| index_error(FULLTEXT, &e))
    }

    /// Empty the vector index.
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when the index fails.
    pub fn clear(&self) -> Result<(), RetrievalError> {
        self.vector.clear().map_err(|e| index_error(VECTOR, &e))
    }

    /// Empty the full-text index; a no-op when full-text search is off.
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when the index fails.
    pub fn clear_fulltext(&self) -> Result<(), RetrievalError> {
        self.fulltext()
            .map_or(Ok(()), |index| index.clear().map_err(|e| index_error(FULLTEXT, &e)))
    }

    /// Empty both indexes. Both are attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when either index fails.
    pub fn clear_all(&self) -> Result<(), RetrievalError> {
        let vector = self.clear();
        let fulltext = self.clear_fulltext();
        vector.and(fulltext)
    }

    /// Run one scoring pass on the reranker, if any.
    ///
    /// # Errors
    ///
    /// Whatever the warmup pass returned; later queries are unaffected.
    pub fn warmup(&self) -> Result<(), RetrievalError> {
        self.reranker.as_ref().map_or(Ok(()), SemanticReranker::warmup)
    }

    /// # Errors
    ///
    /// `IndexUnavailable` when an index cannot report its size.
    pub fn stats(&self) -> Result<IndexStats, RetrievalError> {
        let vector_documents = self.vector.len().map_err(|e| index_error(VECTOR, &e))?;
        let fulltext_documents = self
            .fulltext()
            .map(|index| index.len().map_err(|e| index_error(FULLTEXT, &e)))
            .transpose()?;
        Ok(IndexStats {
            vector_backend: self.vector.name().to_string(),
            vector_documents,
            fulltext_backend: self.fulltext().map(|i| i.name().to_string()),
            fulltext_documents,
            semantic_rerank_loaded: self
                .reranker
                .as_ref()
                .is_some_and(SemanticReranker::is_loaded),
        })
    }
}

/// Candidates in raw vector order, as single-source results.
fn vector_only(mut candidates: Vec<ScoredHit>, top_k: usize) -> Vec<FusedResult> {
    candidates.truncate(top_k);
    single_source(Source::Vector, candidates)
}

/// Map a collaborator failure into the taxonomy. A `RetrievalError` anywhere
/// in the chain passes through unchanged.
fn index_error(index: &str, err: &anyhow::Error) -> RetrievalError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RetrievalError>())
        .cloned()
        .unwrap_or_else(|| RetrievalError::index_unavailable(index, format!("{err:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FlatVectorIndex, MemoryFullTextIndex};
    use crate::semantic::CrossEncoder;
    use coderag_core::state::IndexStatus;

    fn point(id: &str, content: &str, embedding: [f32; 2]) -> VectorPoint {
        VectorPoint::new(
            Document::new(id, format!("src/{id}.rs"), content),
            embedding.to_vec(),
        )
    }

    fn corpus() -> Vec<VectorPoint> {
        vec![
            point("parse", "parse toml config file", [1.0, 0.0]),
            point("retry", "retry http request with backoff", [0.9, 0.1]),
            point("pool", "database connection pool", [0.0, 1.0]),
        ]
    }

    fn config(enable_fulltext: bool) -> RetrievalConfig {
        RetrievalConfig {
            enable_fulltext,
            ..RetrievalConfig::default()
        }
    }

    fn orchestrator(enable_fulltext: bool) -> RetrievalOrchestrator {
        let orchestrator = RetrievalOrchestrator::new(Arc::new(FlatVectorIndex::new(2)), config(enable_fulltext))
            .with_fulltext(Arc::new(MemoryFullTextIndex::new(Bm25Params::default())));
        orchestrator.add(&corpus()).expect("add");
        orchestrator
    }

    fn ids(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.document.id.as_str()).collect()
    }

    struct LengthEncoder;

    impl CrossEncoder for LengthEncoder {
        fn score_pairs(&self, _query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>> {
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }

        fn model_id(&self) -> &str {
            "test/length"
        }
    }

    #[test]
    fn retrieve_is_vector_pass_through() {
        let orchestrator = orchestrator(false);
        let hits = orchestrator.retrieve("config", &[1.0, 0.0], 2).expect("retrieve");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "parse");
        assert_eq!((hits[0].rank, hits[1].rank), (1, 2));
    }

    #[test]
    fn retrieve_passes_dimension_errors_through() {
        let orchestrator = orchestrator(false);
        let err = orchestrator.retrieve("q", &[1.0], 2).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn no_rerank_keeps_vector_order() {
        let orchestrator = orchestrator(false);
        let options = HybridOptions::new(2).with_rerank(false);
        let report = orchestrator
            .hybrid_retrieve_report("pool", &[1.0, 0.0], &options)
            .expect("retrieve");
        assert_eq!(ids(&report.results), vec!["parse", "retry"]);
        assert!(report.reached(QueryStage::SkipRerank));
        assert!(!report.is_degraded());
    }

    #[test]
    fn lexical_rerank_promotes_term_matches() {
        let orchestrator = orchestrator(false);
        let results = orchestrator
            .hybrid_retrieve("retry backoff", &[1.0, 0.0], &HybridOptions::new(2))
            .expect("retrieve");
        assert_eq!(results[0].document.id, "retry");
        assert!(results[0].sources.contains(&Source::Lexical));
        assert!(results[0].sources.contains(&Source::Vector));
    }

    #[test]
    fn semantic_without_reranker_degrades_to_lexical() {
        let orchestrator = orchestrator(false);
        let lexical = orchestrator
            .hybrid_retrieve("retry backoff", &[1.0, 0.0], &HybridOptions::new(3))
            .expect("lexical");
        let report = orchestrator
            .hybrid_retrieve_report(
                "retry backoff",
                &[1.0, 0.0],
                &HybridOptions::new(3).with_method(RerankMethod::Semantic),
            )
            .expect("semantic");
        assert_eq!(report.results, lexical);
        assert_eq!(report.degradations.len(), 1);
        assert_eq!(report.degradations[0].component, SEMANTIC_RERANK);
    }

    #[test]
    fn semantic_rerank_uses_cross_encoder() {
        let orchestrator =
            orchestrator(false).with_reranker(SemanticReranker::new(Arc::new(LengthEncoder)));
        let report = orchestrator
            .hybrid_retrieve_report(
                "anything",
                &[1.0, 0.0],
                &HybridOptions::new(2).with_method(RerankMethod::Semantic),
            )
            .expect("semantic");
        assert_eq!(ids(&report.results), vec!["retry", "pool"]);
        assert!(report.results[0].rerank_score.is_some());
        assert!(report.reached(QueryStage::Reranked));
    }

    #[test]
    fn fused_merges_vector_and_fulltext() {
        let orchestrator = orchestrator(true);
        let report = orchestrator
            .hybrid_retrieve_report(
                "connection pool",
                &[1.0, 0.0],
                &HybridOptions::new(3).with_method(RerankMethod::Fused),
            )
            .expect("fused");
        let pool = report
            .results
            .iter()
            .find(|r| r.document.id == "pool")
            .expect("pool result");
        assert!(pool.sources.contains(&Source::Fulltext));
        assert!(report.reached(QueryStage::Fanout));
        assert!(report.reached(QueryStage::SkipRerank));
    }

    #[test]
    fn fused_without_fulltext_is_vector_only() {
        let orchestrator = orchestrator(false);
        let report = orchestrator
            .hybrid_retrieve_report(
                "pool",
                &[1.0, 0.0],
                &HybridOptions::new(2).with_method(RerankMethod::Fused),
            )
            .expect("fused");
        assert_eq!(ids(&report.results), vec!["parse", "retry"]);
        assert_eq!(report.degradations[0].component, FULLTEXT);
    }

    #[test]
    fn zero_top_k_returns_nothing() {
        let orchestrator = orchestrator(true);
        let report = orchestrator
            .hybrid_retrieve_report("pool", &[1.0, 0.0], &HybridOptions::new(0))
            .expect("retrieve");
        assert!(report.results.is_empty());
        assert_eq!(report.stages, vec![QueryStage::Received, QueryStage::Returned]);
    }

    #[test]
    fn fulltext_operations_require_the_feature() {
        let orchestrator = orchestrator(false);
        assert!(matches!(
            orchestrator.fulltext_search("pool", 5),
            Err(RetrievalError::FeatureDisabled(_))
        ));
        assert!(matches!(
            orchestrator.delete("pool"),
            Err(RetrievalError::FeatureDisabled(_))
        ));
        orchestrator.clear_fulltext().expect("no-op when disabled");
    }

    #[test]
    fn filtered_fulltext_search() {
        let orchestrator = orchestrator(true);
        let hits = orchestrator
            .fulltext_search_filtered("pool config", 5, &HitFilter::file_path_prefix("src/pool"))
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "pool");
    }

    #[test]
    fn add_rejects_invalid_documents_before_writing() {
        let orchestrator = orchestrator(true);
        let err = orchestrator
            .add(&[point("blank", "   ", [1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
        let stats = orchestrator.stats().expect("stats");
        assert_eq!(stats.vector_documents, 3);
        assert_eq!(stats.fulltext_documents, Some(3));
    }

    #[test]
    fn add_tracked_drives_index_state() {
        let orchestrator = orchestrator(true);
        let mut states = IndexStateStore::new();
        states.register("repo", "repo", "default");

        let report = orchestrator
            .add_tracked("repo", &corpus(), &mut states)
            .expect("add");
        assert_eq!(report.fulltext, FulltextWrite::Written(3));
        let entry = states.get("repo").expect("entry");
        assert_eq!(entry.status, IndexStatus::Completed);
        assert_eq!(entry.chunk_count, 3);

        let err = orchestrator
            .add_tracked(
                "repo",
                &[VectorPoint::new(Document::new("bad", "bad.rs", "x"), vec![1.0])],
                &mut states,
            )
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
        assert_eq!(states.get("repo").expect("entry").status, IndexStatus::Failed);

        assert!(matches!(
            orchestrator.add_tracked("unknown", &corpus(), &mut states),
            Err(RetrievalError::NotFound(_))
        ));
    }

    #[test]
    fn clear_all_is_idempotent() {
        let orchestrator = orchestrator(true);
        orchestrator.clear_all().expect("clear");
        orchestrator.clear_all().expect("clear again");
        let stats = orchestrator.stats().expect("stats");
        assert_eq!(stats.vector_documents, 0);
        assert_eq!(stats.fulltext_documents, Some(0));
        assert!(!stats.semantic_rerank_loaded);
    }

    #[test]
    fn from_config_opens_sqlite_backends() {
        let tmp = tempfile::tempdir().expect("tempdir must be created");
        let mut config = CoderagConfig::default();
        config.retrieval.enable_fulltext = true;
        config.index.vector_backend = coderag_core::config::VectorBackend::Sqlite;
        config.index.fulltext_backend = coderag_core::config::FulltextBackend::Sqlite;
        config.index.embedding_dim = 2;
        config.rerank.enable_semantic_rerank = true;
        config.rerank.model_dir = Some(tmp.path().join("missing-model"));

        let orchestrator = RetrievalOrchestrator::from_config(&config, tmp.path()).expect("build");
        orchestrator.add(&corpus()).expect("add");

        let stats = orchestrator.stats().expect("stats");
        assert_eq!(stats.vector_backend, "sqlite-vector");
        assert_eq!(stats.fulltext_backend.as_deref(), Some("sqlite-fts5"));
        assert_eq!(stats.fulltext_documents, Some(3));
        assert!(!stats.semantic_rerank_loaded);
        assert!(orchestrator.warmup().is_err());
    }

    #[test]
    fn vector_scores_are_max_normalized_per_source() {
        let orchestrator =
            orchestrator(false).with_reranker(SemanticReranker::new(Arc::new(LengthEncoder)));
        // Best raw cosine here is about 0.78, well below 1.
        let embedding = [1.0, 1.0];

        let plain = orchestrator
            .hybrid_retrieve("q", &embedding, &HybridOptions::new(3).with_rerank(false))
            .expect("no rerank");
        assert_eq!(plain[0].document.id, "retry");
        assert!((plain[0].normalized(Source::Vector) - 1.0).abs() < 1e-6);
        assert!(plain[0].combined_score < 0.9);
        assert!(plain.iter().all(|r| (0.0..=1.0).contains(&r.normalized(Source::Vector))));

        let semantic = orchestrator
            .hybrid_retrieve(
                "q",
                &embedding,
                &HybridOptions::new(3).with_method(RerankMethod::Semantic),
            )
            .expect("semantic");
        let retry = semantic
            .iter()
            .find(|r| r.document.id == "retry")
            .expect("retry result");
        assert!((retry.normalized(Source::Vector) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn suggest_goes_through_fulltext() {
        let enabled = orchestrator(true);
        assert_eq!(
            enabled.suggest("src/p", SuggestField::FilePath, 5).expect("suggest"),
            vec!["src/parse.rs", "src/pool.rs"]
        );
        assert!(matches!(
            orchestrator(false).suggest("src/", SuggestField::FilePath, 5),
            Err(RetrievalError::FeatureDisabled(_))
        ));
    }
}
