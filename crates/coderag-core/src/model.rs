//! Retrieval data model.
//!
//! A [`Document`] is the unit stored in an index. Searching produces
//! [`ScoredHit`]s, one list per source; fusion turns those lists into
//! [`FusedResult`]s. Hits and fused results are transient and built fresh per
//! query.

use crate::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A retrievable source-code fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within an index. May be empty for hits from
    /// backends that do not store ids; [`Document::identity_key`] then falls
    /// back to `file_path`.
    #[serde(default)]
    pub id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_name: Option<String>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            start_line: None,
            end_line: None,
            content: content.into(),
            structure_type: None,
            structure_name: None,
        }
    }

    #[must_use]
    pub const fn with_lines(mut self, start_line: u32, end_line: u32) -> Self {
        self.start_line = Some(start_line);
        self.end_line = Some(end_line);
        self
    }

    #[must_use]
    pub fn with_structure(
        mut self,
        structure_type: impl Into<String>,
        structure_name: impl Into<String>,
    ) -> Self {
        self.structure_type = Some(structure_type.into());
        self.structure_name = Some(structure_name.into());
        self
    }

    /// Key used for upserts and cross-source deduplication.
    #[must_use]
    pub fn identity_key(&self) -> &str {
        if self.id.is_empty() {
            &self.file_path
        } else {
            &self.id
        }
    }

    /// Check the invariants every stored document must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidInput`] for empty content, an empty
    /// identity key, zero line numbers, or `start_line > end_line`.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.content.trim().is_empty() {
            return Err(RetrievalError::invalid_input(format!(
                "document '{}' has empty content",
                self.identity_key()
            )));
        }
        if self.identity_key().is_empty() {
            return Err(RetrievalError::invalid_input(
                "document has neither id nor file_path",
            ));
        }
        if self.start_line == Some(0) || self.end_line == Some(0) {
            return Err(RetrievalError::invalid_input(format!(
                "document '{}' has a zero line number (lines are 1-based)",
                self.identity_key()
            )));
        }
        if let (Some(start), Some(end)) = (self.start_line, self.end_line) {
            if start > end {
                return Err(RetrievalError::invalid_input(format!(
                    "document '{}' has start_line {start} > end_line {end}",
                    self.identity_key()
                )));
            }
        }
        Ok(())
    }
}

/// A document plus its embedding, the unit written to a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub document: Document,
    pub embedding: Vec<f32>,
}

impl VectorPoint {
    pub const fn new(document: Document, embedding: Vec<f32>) -> Self {
        Self {
            document,
            embedding,
        }
    }
}

/// Origin of a ranked list.
///
/// Declaration order is the canonical fusion order; it decides ties between
/// documents with equal combined scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Dense-vector similarity from a vector index.
    Vector,
    /// Scores from an external full-text index.
    Fulltext,
    /// BM25 scores computed in-process over vector candidates.
    Lexical,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Fulltext => "fulltext",
            Self::Lexical => "lexical",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative weight of vector vs term-based evidence.
///
/// Always normalized: the two weights sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceWeights {
    vector: f32,
    fulltext: f32,
}

impl SourceWeights {
    /// Build normalized weights. Negative or non-finite inputs count as zero;
    /// a zero sum falls back to an even split.
    #[must_use]
    pub fn new(vector_weight: f32, fulltext_weight: f32) -> Self {
        let vector = sanitize_weight(vector_weight);
        let fulltext = sanitize_weight(fulltext_weight);
        let total = vector + fulltext;
        if total > 0.0 && total.is_finite() {
            Self {
                vector: vector / total,
                fulltext: fulltext / total,
            }
        } else {
            Self::even()
        }
    }

    #[must_use]
    pub const fn even() -> Self {
        Self {
            vector: 0.5,
            fulltext: 0.5,
        }
    }

    #[must_use]
    pub const fn vector(&self) -> f32 {
        self.vector
    }

    #[must_use]
    pub const fn fulltext(&self) -> f32 {
        self.fulltext
    }

    /// Weight applied to a source's normalized score. Lexical scores share
    /// the full-text weight.
    #[must_use]
    pub const fn weight_for(&self, source: Source) -> f32 {
        match source {
            Source::Vector => self.vector,
            Source::Fulltext | Source::Lexical => self.fulltext,
        }
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::even()
    }
}

fn sanitize_weight(weight: f32) -> f32 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// One entry of a single source's ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub document: Document,
    /// Non-negative, source-specific scale.
    pub score: f32,
    /// 1-based position within the source's list.
    pub rank: usize,
}

impl ScoredHit {
    pub const fn new(document: Document, score: f32, rank: usize) -> Self {
        Self {
            document,
            score,
            rank,
        }
    }
}

/// Renumber a list 1..=n in its current order.
pub fn assign_ranks(hits: &mut [ScoredHit]) {
    for (idx, hit) in hits.iter_mut().enumerate() {
        hit.rank = idx + 1;
    }
}

/// A deduplicated result carrying evidence from one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub document: Document,
    /// Sources whose lists contained this document. Never empty.
    pub sources: BTreeSet<Source>,
    /// Per-source score after max-normalization, in `[0, 1]`.
    pub normalized_scores: BTreeMap<Source, f32>,
    /// Weighted sum of normalized scores, or the rerank score after a
    /// semantic rerank pass.
    pub combined_score: f32,
    /// Final 1-based position.
    pub rank: usize,
    /// Cross-encoder score written by the semantic rerank stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl FusedResult {
    /// Single-source result; `normalized` is the source's normalized score.
    pub fn single(document: Document, source: Source, normalized: f32, combined: f32) -> Self {
        Self {
            document,
            sources: BTreeSet::from([source]),
            normalized_scores: BTreeMap::from([(source, normalized)]),
            combined_score: combined,
            rank: 0,
            rerank_score: None,
        }
    }

    #[must_use]
    pub fn identity_key(&self) -> &str {
        self.document.identity_key()
    }

    #[must_use]
    pub fn normalized(&self, source: Source) -> f32 {
        self.normalized_scores.get(&source).copied().unwrap_or(0.0)
    }
}

/// Constraints applied to full-text search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitFilter {
    #[serde(default)]
    pub file_path_prefix: Option<String>,
    #[serde(default)]
    pub structure_type: Option<String>,
}

impl HitFilter {
    #[must_use]
    pub fn file_path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            file_path_prefix: Some(prefix.into()),
            structure_type: None,
        }
    }

    #[must_use]
    pub fn with_structure_type(mut self, structure_type: impl Into<String>) -> Self {
        self.structure_type = Some(structure_type.into());
        self
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.file_path_prefix.is_none() && self.structure_type.is_none()
    }

    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        let path_ok = self
            .file_path_prefix
            .as_deref()
            .is_none_or(|prefix| document.file_path.starts_with(prefix));
        let type_ok = self
            .structure_type
            .as_deref()
            .is_none_or(|wanted| document.structure_type.as_deref() == Some(wanted));
        path_ok && type_ok
    }
}
