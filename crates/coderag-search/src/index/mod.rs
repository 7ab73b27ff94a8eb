//! Index collaborators and their reference backends.
//!
//! The orchestrator talks to indexes only through [`VectorIndex`] and
//! [`FullTextIndex`]. Backends are picked at construction from
//! [`IndexConfig`]; nothing probes a backend for optional methods at runtime.
//!
//! | Backend                 | Trait           | Storage                        |
//! |-------------------------|-----------------|--------------------------------|
//! | [`FlatVectorIndex`]     | `VectorIndex`   | in memory, brute-force cosine  |
//! | [`SqliteVectorIndex`]   | `VectorIndex`   | SQLite table, JSON embeddings  |
//! | [`MemoryFullTextIndex`] | `FullTextIndex` | in memory, BM25                |
//! | [`SqliteFullTextIndex`] | `FullTextIndex` | SQLite FTS5, `bm25()` ranking  |

mod memory;
mod sqlite;

pub use memory::{FlatVectorIndex, MemoryFullTextIndex};
pub use sqlite::{SqliteFullTextIndex, SqliteVectorIndex};

use anyhow::{Context, Result};
use coderag_core::config::{FulltextBackend, IndexConfig, VectorBackend};
use coderag_core::model::{Document, HitFilter, ScoredHit, VectorPoint, assign_ranks};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::lexical::Bm25Params;

/// Nearest-neighbor store over document embeddings.
///
/// Implementations guard their own state; all methods take `&self` so one
/// handle can serve concurrent queries.
pub trait VectorIndex: Send + Sync {
    /// Short backend label used in logs and errors.
    fn name(&self) -> &str;

    /// Upsert points by document identity key. Returns how many were written.
    fn add(&self, points: &[VectorPoint]) -> Result<usize>;

    /// Up to `k` hits, best first, scores in `[0, 1]`, ranks from 1.
    fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredHit>>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Term-based document search.
pub trait FullTextIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Upsert documents by identity key. Returns how many were written.
    fn add(&self, documents: &[Document]) -> Result<usize>;

    /// Up to `limit` matching hits, best first, non-negative scores.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredHit>>;

    /// Like [`FullTextIndex::search`], restricted to hits matching `filter`.
    ///
    /// The default over-fetches and filters afterwards, so it can return
    /// fewer than `limit` hits even when more matches exist.
    fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &HitFilter,
    ) -> Result<Vec<ScoredHit>> {
        if filter.is_empty() {
            return self.search(query, limit);
        }
        let mut hits: Vec<ScoredHit> = self
            .search(query, limit.saturating_mul(FILTER_OVERFETCH))?
            .into_iter()
            .filter(|hit| filter.matches(&hit.document))
            .collect();
        hits.truncate(limit);
        assign_ranks(&mut hits);
        Ok(hits)
    }

    /// Autocomplete: up to `limit` distinct stored values of `field` that
    /// start with `prefix`, ignoring case, in indexing order. A blank prefix
    /// yields nothing.
    fn suggest(&self, prefix: &str, field: SuggestField, limit: usize) -> Result<Vec<String>>;

    /// Remove the document whose identity key is `id`. `false` if absent.
    fn delete(&self, id: &str) -> Result<bool>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

const FILTER_OVERFETCH: usize = 4;

/// Stored document field offered for autocompletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestField {
    #[default]
    Content,
    StructureName,
    FilePath,
}

impl SuggestField {
    /// The field's value on `document`, if set.
    #[must_use]
    pub fn value(self, document: &Document) -> Option<&str> {
        match self {
            Self::Content => Some(document.content.as_str()),
            Self::StructureName => document.structure_name.as_deref(),
            Self::FilePath => Some(document.file_path.as_str()),
        }
    }

    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::StructureName => "structure_name",
            Self::FilePath => "file_path",
        }
    }
}

/// Build the configured vector backend.
///
/// # Errors
///
/// Fails when a SQLite database cannot be created or opened.
pub fn open_vector_index(config: &IndexConfig, project_root: &Path) -> Result<Arc<dyn VectorIndex>> {
    match config.vector_backend {
        VectorBackend::Flat => Ok(Arc::new(FlatVectorIndex::new(config.embedding_dim))),
        VectorBackend::Sqlite => {
            let dir = config.resolve_index_dir(project_root);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create index dir {}", dir.display()))?;
            let index = SqliteVectorIndex::open(&dir.join("vectors.db"), config.embedding_dim)?;
            Ok(Arc::new(index))
        }
    }
}

/// Build the configured full-text backend.
///
/// # Errors
///
/// Fails when a SQLite database cannot be created or opened.
pub fn open_fulltext_index(
    config: &IndexConfig,
    params: Bm25Params,
    project_root: &Path,
) -> Result<Arc<dyn FullTextIndex>> {
    match config.fulltext_backend {
        FulltextBackend::Memory => Ok(Arc::new(MemoryFullTextIndex::new(params))),
        FulltextBackend::Sqlite => {
            let dir = config.resolve_index_dir(project_root);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create index dir {}", dir.display()))?;
            Ok(Arc::new(SqliteFullTextIndex::open(&dir.join("fulltext.db"))?))
        }
    }
}

/// Cosine similarity clamped to `[0, 1]`; anti-correlated vectors carry no
/// evidence. Zero vectors score 0.
pub(crate) fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cosine.is_finite() {
        cosine.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
