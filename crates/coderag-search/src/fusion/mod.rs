//! Fusion of per-source ranked lists into one deduplicated ranking.
//!
//! Vector similarity, full-text relevance, and in-process BM25 scores are
//! max-normalized per source and combined with configured weights.

pub mod scoring;

pub use scoring::ScoreFusionEngine;
