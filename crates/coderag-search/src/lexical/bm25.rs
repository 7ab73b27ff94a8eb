//! Okapi BM25 over an in-memory corpus.
//!
//! ```text
//! score(d, q) = Σ_t idf(t) · tf·(k1+1) / (tf + k1·(1 − b + b·dl/avgdl))
//! idf(t)      = ln(1 + (N − df + 0.5) / (df + 0.5))
//! ```
//!
//! The `1 +` inside the logarithm keeps `idf` positive even for terms that
//! occur in every document, so scores are never negative.

use coderag_core::model::{Document, ScoredHit, assign_ranks};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::tokenize::tokenize;

/// BM25 tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength, `0.0..=1.0`.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: Self::DEFAULT_K1,
            b: Self::DEFAULT_B,
        }
    }
}

impl Bm25Params {
    pub const DEFAULT_K1: f32 = 1.5;
    pub const DEFAULT_B: f32 = 0.75;

    /// Parameters that keep every score non-negative. A negative or
    /// non-finite `k1` becomes the default; `b` is clamped to `0.0..=1.0`,
    /// or defaulted when non-finite.
    #[must_use]
    pub fn new(k1: f32, b: f32) -> Self {
        let k1 = if k1.is_finite() && k1 >= 0.0 {
            k1
        } else {
            Self::DEFAULT_K1
        };
        let b = if b.is_finite() {
            b.clamp(0.0, 1.0)
        } else {
            Self::DEFAULT_B
        };
        Self { k1, b }
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.k1.is_finite() && self.k1 >= 0.0 && (0.0..=1.0).contains(&self.b)
    }

    #[must_use]
    pub fn sanitized(self) -> Self {
        Self::new(self.k1, self.b)
    }
}

#[derive(Debug, Clone)]
struct DocStats {
    term_freqs: HashMap<String, u32>,
    len: usize,
}

impl DocStats {
    fn from_text(text: &str) -> Self {
        let tokens = tokenize(text);
        let len = tokens.len();
        let mut term_freqs = HashMap::new();
        for token in tokens {
            *term_freqs.entry(token).or_insert(0) += 1;
        }
        Self { term_freqs, len }
    }
}

/// Term-statistics model for BM25 scoring.
///
/// `index` replaces the whole model; there is no incremental update.
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer {
    params: Bm25Params,
    docs: Vec<DocStats>,
    doc_freq: HashMap<String, usize>,
    avg_len: f32,
}

impl LexicalScorer {
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params: params.sanitized(),
            ..Self::default()
        }
    }

    /// Build corpus statistics from `documents`, discarding any previous model.
    pub fn index(&mut self, documents: &[Document]) {
        self.docs = documents
            .iter()
            .map(|d| DocStats::from_text(&d.content))
            .collect();

        self.doc_freq.clear();
        for doc in &self.docs {
            for term in doc.term_freqs.keys() {
                *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let total: usize = self.docs.iter().map(|d| d.len).sum();
        self.avg_len = if self.docs.is_empty() {
            0.0
        } else {
            total as f32 / self.docs.len() as f32
        };
    }

    #[must_use]
    pub fn is_indexed(&self) -> bool {
        !self.docs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    #[must_use]
    pub const fn params(&self) -> Bm25Params {
        self.params
    }

    /// One score per indexed document, in indexing order. `k1` and `b` go
    /// through [`Bm25Params::new`].
    #[must_use]
    pub fn score(&self, query: &str, k1: f32, b: f32) -> Vec<f32> {
        let terms = tokenize(query);
        let params = Bm25Params::new(k1, b);
        self.docs
            .iter()
            .map(|doc| self.score_doc(&terms, doc, params))
            .collect()
    }

    /// Score `documents` against the indexed statistics and return them best
    /// first, truncated to `top_k`.
    ///
    /// Candidates need not be part of the indexed corpus: their term
    /// frequencies come from their own content, document frequencies from the
    /// index. Without an index every candidate scores 0.0 and input order is
    /// kept.
    #[must_use]
    pub fn rerank(&self, query: &str, documents: &[Document], top_k: usize) -> Vec<ScoredHit> {
        let terms = tokenize(query);
        let mut hits: Vec<ScoredHit> = documents
            .iter()
            .map(|doc| {
                let score = if self.is_indexed() {
                    self.score_doc(&terms, &DocStats::from_text(&doc.content), self.params)
                } else {
                    0.0
                };
                ScoredHit::new(doc.clone(), score, 0)
            })
            .collect();

        // Stable: equal scores keep candidate order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        assign_ranks(&mut hits);
        hits
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5)).ln_1p()
    }

    fn score_doc(&self, terms: &[String], doc: &DocStats, params: Bm25Params) -> f32 {
        if terms.is_empty() || doc.len == 0 {
            return 0.0;
        }
        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };
        let length_norm = params.k1 * (1.0 - params.b + params.b * doc.len as f32 / avg_len);

        terms
            .iter()
            .filter_map(|term| {
                let tf = *doc.term_freqs.get(term)? as f32;
                Some(self.idf(term) * tf * (params.k1 + 1.0) / (tf + length_norm))
            })
            .sum()
    }
}
