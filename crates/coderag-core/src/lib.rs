#![forbid(unsafe_code)]
//! coderag-core library.
//!
//! Shared vocabulary for the retrieval workspace: the document/hit data model,
//! the error taxonomy, configuration loading, index-state tracking, and
//! tracing initialization.
//!
//! # Conventions
//!
//! - **Errors**: Domain failures are [`error::RetrievalError`]; plumbing
//!   (file I/O, config parsing) uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod state;

pub use config::{CoderagConfig, IndexConfig, LoggingConfig, RerankConfig, RetrievalConfig};
pub use error::{ErrorCode, RetrievalError};
pub use model::{
    Document, FusedResult, HitFilter, ScoredHit, Source, SourceWeights, VectorPoint,
};
pub use state::{IndexEntry, IndexStateStore, IndexStatus};
