//! Weighted score fusion across ranked lists.
//!
//! # Algorithm Overview
//!
//! Each source's list is normalized by its own maximum score so that cosine
//! similarities and unbounded BM25 values land on the same `[0, 1]` scale,
//! then documents are merged by identity key and their normalized scores
//! combined with the configured [`SourceWeights`]:
//!
//! ```text
//! normalized(d, s) = raw(d, s) / max_score(s)        (0 when max_score(s) == 0)
//! combined(d)      = Σ_s weight(s) · normalized(d, s)
//! ```
//!
//! Documents below `min_similarity` are dropped, the rest are sorted by
//! `combined` descending, ranked from 1, and truncated.
//!
//! # Determinism
//!
//! Lists are processed in canonical [`Source`] order (vector, fulltext,
//! lexical) whatever order the caller supplied them in, and the final sort is
//! stable. Ties are therefore broken by first appearance in that canonical
//! order, and the output is independent of which source finished first.
//!
//! # Example
//!
//! ```ignore
//! use coderag_core::{ScoredHit, Source, SourceWeights};
//! use coderag_search::fusion::ScoreFusionEngine;
//!
//! let engine = ScoreFusionEngine::new(SourceWeights::even()).with_min_similarity(0.1);
//! let fused = engine.fuse(vec![(Source::Vector, vector_hits), (Source::Fulltext, text_hits)], 5);
//! ```

use coderag_core::model::{FusedResult, ScoredHit, Source, SourceWeights};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Merges per-source ranked lists into one deduplicated ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreFusionEngine {
    weights: SourceWeights,
    min_similarity: f32,
}

impl Default for ScoreFusionEngine {
    fn default() -> Self {
        Self::new(SourceWeights::default())
    }
}

impl ScoreFusionEngine {
    #[must_use]
    pub const fn new(weights: SourceWeights) -> Self {
        Self {
            weights,
            min_similarity: 0.0,
        }
    }

    /// Drop fused results whose combined score is below `min_similarity`.
    #[must_use]
    pub const fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    #[must_use]
    pub const fn weights(&self) -> SourceWeights {
        self.weights
    }

    #[must_use]
    pub const fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Fuse zero or more `(source, hits)` lists into at most `top_k` results.
    ///
    /// Within a single list, a repeated identity key keeps its higher score.
    /// Across lists, the first occurrence (in canonical source order) supplies
    /// the document fields; later ones only add their source and score.
    #[must_use]
    pub fn fuse(&self, mut lists: Vec<(Source, Vec<ScoredHit>)>, top_k: usize) -> Vec<FusedResult> {
        lists.sort_by_key(|(source, _)| *source);

        let mut fused: Vec<FusedResult> = Vec::new();
        let mut slot_by_key: HashMap<String, usize> = HashMap::new();

        for (source, hits) in lists {
            let max_score = max_score(&hits);
            for hit in hits {
                let normalized = normalize(hit.score, max_score);
                match slot_by_key.entry(hit.document.identity_key().to_string()) {
                    Entry::Occupied(slot) => {
                        let result = &mut fused[*slot.get()];
                        result.sources.insert(source);
                        let current = result.normalized_scores.entry(source).or_insert(normalized);
                        if normalized > *current {
                            *current = normalized;
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(fused.len());
                        fused.push(FusedResult::single(hit.document, source, normalized, 0.0));
                    }
                }
            }
        }

        for result in &mut fused {
            result.combined_score = result
                .normalized_scores
                .iter()
                .map(|(source, score)| self.weights.weight_for(*source) * score)
                .sum();
        }

        fused.retain(|r| r.combined_score >= self.min_similarity);
        fused.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        fused.truncate(top_k);
        for (idx, result) in fused.iter_mut().enumerate() {
            result.rank = idx + 1;
        }
        fused
    }
}

/// One source's list as fused results, in input order, ranked from 1.
///
/// The per-source entry is max-normalized like [`ScoreFusionEngine::fuse`];
/// `combined_score` keeps the raw score so the input order stands.
pub(crate) fn single_source(source: Source, hits: Vec<ScoredHit>) -> Vec<FusedResult> {
    let max_score = max_score(&hits);
    hits.into_iter()
        .enumerate()
        .map(|(idx, hit)| {
            let normalized = normalize(hit.score, max_score);
            let mut result = FusedResult::single(hit.document, source, normalized, hit.score);
            result.rank = idx + 1;
            result
        })
        .collect()
}

/// Largest usable score in a list; 1.0 for an empty list.
fn max_score(hits: &[ScoredHit]) -> f32 {
    if hits.is_empty() {
        return 1.0;
    }
    hits.iter()
        .map(|h| sanitize(h.score))
        .fold(0.0_f32, f32::max)
}

fn normalize(raw: f32, max_score: f32) -> f32 {
    if max_score > 0.0 {
        sanitize(raw) / max_score
    } else {
        0.0
    }
}

/// Negative and non-finite scores carry no evidence.
fn sanitize(score: f32) -> f32 {
    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}
