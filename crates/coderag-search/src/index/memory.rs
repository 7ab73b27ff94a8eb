use anyhow::Result;
use coderag_core::error::RetrievalError;
use coderag_core::model::{Document, HitFilter, ScoredHit, VectorPoint, assign_ranks};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{FullTextIndex, SuggestField, VectorIndex, cosine_score};
use crate::lexical::{Bm25Params, LexicalScorer};

/// Insertion-ordered upsert store keyed by document identity.
#[derive(Debug)]
struct Slots<T> {
    items: Vec<T>,
    by_key: HashMap<String, usize>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<T> Slots<T> {
    fn upsert(&mut self, key: &str, item: T) {
        if let Some(&idx) = self.by_key.get(key) {
            self.items[idx] = item;
        } else {
            self.by_key.insert(key.to_string(), self.items.len());
            self.items.push(item);
        }
    }

    fn remove(&mut self, key: &str) -> Option<T> {
        let idx = self.by_key.remove(key)?;
        let item = self.items.remove(idx);
        for slot in self.by_key.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(item)
    }

    fn clear(&mut self) {
        self.items.clear();
        self.by_key.clear();
    }
}

#[derive(Debug)]
struct StoredPoint {
    document: Document,
    embedding: Vec<f32>,
}

/// Brute-force cosine search over embeddings held in memory.
#[derive(Debug)]
pub struct FlatVectorIndex {
    dimension: usize,
    points: RwLock<Slots<StoredPoint>>,
}

impl FlatVectorIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(Slots::default()),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, len: usize, what: &str) -> Result<(), RetrievalError> {
        if len == self.dimension {
            Ok(())
        } else {
            Err(RetrievalError::invalid_input(format!(
                "{what} dimension mismatch: expected {}, got {len}",
                self.dimension
            )))
        }
    }
}

impl VectorIndex for FlatVectorIndex {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn add(&self, points: &[VectorPoint]) -> Result<usize> {
        for point in points {
            point.document.validate()?;
            self.check_dimension(point.embedding.len(), "embedding")?;
        }

        let mut store = self.points.write();
        for point in points {
            store.upsert(
                point.document.identity_key(),
                StoredPoint {
                    document: point.document.clone(),
                    embedding: point.embedding.clone(),
                },
            );
        }
        Ok(points.len())
    }

    fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredHit>> {
        self.check_dimension(embedding.len(), "query embedding")?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let store = self.points.read();
        let mut hits: Vec<ScoredHit> = store
            .items
            .iter()
            .map(|p| ScoredHit::new(p.document.clone(), cosine_score(embedding, &p.embedding), 0))
            .collect();
        drop(store);

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        assign_ranks(&mut hits);
        Ok(hits)
    }

    fn clear(&self) -> Result<()> {
        self.points.write().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.points.read().items.len())
    }
}

#[derive(Debug, Default)]
struct TextState {
    docs: Slots<Document>,
    scorer: LexicalScorer,
}

impl TextState {
    fn reindex(&mut self, params: Bm25Params) {
        let mut scorer = LexicalScorer::new(params);
        scorer.index(&self.docs.items);
        self.scorer = scorer;
    }
}

/// BM25 full-text index held in memory.
///
/// Every write rebuilds the term statistics, which is fine for the corpus
/// sizes a single repository produces.
#[derive(Debug)]
pub struct MemoryFullTextIndex {
    params: Bm25Params,
    state: RwLock<TextState>,
}

impl MemoryFullTextIndex {
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            state: RwLock::new(TextState::default()),
        }
    }

    fn ranked(&self, query: &str, limit: usize, filter: Option<&HitFilter>) -> Vec<ScoredHit> {
        if limit == 0 {
            return Vec::new();
        }
        let state = self.state.read();
        let scores = state.scorer.score(query, self.params.k1, self.params.b);
        let mut hits: Vec<ScoredHit> = state
            .docs
            .items
            .iter()
            .zip(scores)
            .filter(|(doc, score)| *score > 0.0 && filter.is_none_or(|f| f.matches(doc)))
            .map(|(doc, score)| ScoredHit::new(doc.clone(), score, 0))
            .collect();
        drop(state);

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        assign_ranks(&mut hits);
        hits
    }
}

impl FullTextIndex for MemoryFullTextIndex {
    fn name(&self) -> &'static str {
        "memory-bm25"
    }

    fn add(&self, documents: &[Document]) -> Result<usize> {
        for doc in documents {
            doc.validate()?;
        }
        let mut state = self.state.write();
        for doc in documents {
            state.docs.upsert(doc.identity_key(), doc.clone());
        }
        state.reindex(self.params);
        Ok(documents.len())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredHit>> {
        Ok(self.ranked(query, limit, None))
    }

    fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &HitFilter,
    ) -> Result<Vec<ScoredHit>> {
        Ok(self.ranked(query, limit, Some(filter)))
    }

    fn suggest(&self, prefix: &str, field: SuggestField, limit: usize) -> Result<Vec<String>> {
        if prefix.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let prefix = prefix.to_lowercase();
        let state = self.state.read();
        let mut suggestions: Vec<String> = Vec::new();
        for value in state.docs.items.iter().filter_map(|doc| field.value(doc)) {
            if value.to_lowercase().starts_with(&prefix) && !suggestions.iter().any(|s| s == value) {
                suggestions.push(value.to_string());
                if suggestions.len() == limit {
                    break;
                }
            }
        }
        Ok(suggestions)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state.docs.remove(id).is_some();
        if removed {
            state.reindex(self.params);
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        state.docs.clear();
        state.reindex(self.params);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.state.read().docs.items.len())
    }
}
