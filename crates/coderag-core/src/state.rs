//! Indexing lifecycle tracking for ingested sources.
//!
//! A source (typically one file) moves through
//! `pending -> indexing -> completed | failed`. A completed or failed source
//! may be re-indexed, which moves it back to `indexing`. The store is an
//! ordinary value owned by the caller; nothing here is process-global.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Indexing,
    Completed,
    Failed,
}

impl IndexStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Completed | Self::Failed, Self::Indexing)
                | (Self::Indexing, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one ingested source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub dataset_id: String,
    pub status: IndexStatus,
    /// Inactive sources stay indexed but callers should hide them.
    pub active: bool,
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStateStore {
    entries: BTreeMap<String, IndexEntry>,
}

impl IndexStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source as pending. Registering an existing id resets it.
    pub fn register(
        &mut self,
        source_id: impl Into<String>,
        name: impl Into<String>,
        dataset_id: impl Into<String>,
    ) -> &IndexEntry {
        let source_id = source_id.into();
        let now = Utc::now();
        let entry = IndexEntry {
            source_id: source_id.clone(),
            name: name.into(),
            dataset_id: dataset_id.into(),
            status: IndexStatus::Pending,
            active: true,
            chunk_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            indexed_at: None,
        };
        self.entries.insert(source_id.clone(), entry);
        &self.entries[&source_id]
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidStateTransition` when the source
    /// is already indexing.
    pub fn start_indexing(&mut self, source_id: &str) -> Result<(), RetrievalError> {
        let entry = self.transition(source_id, IndexStatus::Indexing)?;
        entry.error_message = None;
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidStateTransition` unless indexing.
    pub fn complete(&mut self, source_id: &str, chunk_count: usize) -> Result<(), RetrievalError> {
        let entry = self.transition(source_id, IndexStatus::Completed)?;
        entry.chunk_count = chunk_count;
        entry.indexed_at = Some(entry.updated_at);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidStateTransition` unless indexing.
    pub fn fail(
        &mut self,
        source_id: &str,
        error_message: impl Into<String>,
    ) -> Result<(), RetrievalError> {
        let entry = self.transition(source_id, IndexStatus::Failed)?;
        entry.error_message = Some(error_message.into());
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn activate(&mut self, source_id: &str) -> Result<(), RetrievalError> {
        self.set_active(source_id, true)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn deactivate(&mut self, source_id: &str) -> Result<(), RetrievalError> {
        self.set_active(source_id, false)
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<&IndexEntry> {
        self.entries.get(source_id)
    }

    /// All entries, optionally restricted to one dataset, ordered by id.
    #[must_use]
    pub fn list(&self, dataset_id: Option<&str>) -> Vec<&IndexEntry> {
        self.entries
            .values()
            .filter(|e| dataset_id.is_none_or(|d| e.dataset_id == d))
            .collect()
    }

    #[must_use]
    pub fn by_status(&self, status: IndexStatus, dataset_id: Option<&str>) -> Vec<&IndexEntry> {
        self.list(dataset_id)
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }

    pub fn remove(&mut self, source_id: &str) -> Option<IndexEntry> {
        self.entries.remove(source_id)
    }

    /// Drop every entry, or only those of one dataset.
    pub fn clear(&mut self, dataset_id: Option<&str>) {
        let Some(dataset) = dataset_id else {
            self.entries.clear();
            return;
        };
        self.entries.retain(|_, e| e.dataset_id != dataset);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn transition(
        &mut self,
        source_id: &str,
        next: IndexStatus,
    ) -> Result<&mut IndexEntry, RetrievalError> {
        let entry = self
            .entries
            .get_mut(source_id)
            .ok_or_else(|| RetrievalError::NotFound(source_id.to_string()))?;
        if !entry.status.can_transition_to(next) {
            return Err(RetrievalError::InvalidStateTransition {
                id: source_id.to_string(),
                from: entry.status.as_str(),
                to: next.as_str(),
            });
        }
        entry.status = next;
        entry.updated_at = Utc::now();
        Ok(entry)
    }

    fn set_active(&mut self, source_id: &str, active: bool) -> Result<(), RetrievalError> {
        let entry = self
            .entries
            .get_mut(source_id)
            .ok_or_else(|| RetrievalError::NotFound(source_id.to_string()))?;
        entry.active = active;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
