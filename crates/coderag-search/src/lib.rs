#![forbid(unsafe_code)]
//! coderag-search library.
//!
//! Hybrid retrieval over code chunks: vector similarity and full-text search,
//! fused into one ranking and optionally reranked with BM25 or a
//! cross-encoder.
//!
//! # Conventions
//!
//! - **Errors**: Index collaborators return `anyhow::Result`; the
//!   orchestrator maps failures into [`coderag_core::RetrievalError`].
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod fusion;
pub mod index;
pub mod lexical;
pub mod orchestrator;
pub mod semantic;

pub use fusion::ScoreFusionEngine;
pub use index::{
    FlatVectorIndex, FullTextIndex, MemoryFullTextIndex, SqliteFullTextIndex, SqliteVectorIndex,
    SuggestField, VectorIndex,
};
pub use lexical::{Bm25Params, LexicalScorer};
pub use orchestrator::{
    AddReport, Degradation, FulltextWrite, HybridOptions, IndexStats, QueryStage, RerankMethod,
    RetrievalOrchestrator, RetrievalReport,
};
pub use semantic::{CrossEncoder, Rerankable, SemanticReranker};
