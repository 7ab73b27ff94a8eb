//! In-process lexical relevance: tokenization and BM25 scoring.

mod bm25;
mod tokenize;

pub use bm25::{Bm25Params, LexicalScorer};
pub use tokenize::tokenize;
