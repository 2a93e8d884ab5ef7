//! Search for Recall
//!
//! Implements:
//! - BM25 sparse scoring over a per-container inverted index
//! - Hybrid fusion of normalized cosine and BM25 scores
//! - LLM reranking over an overfetched candidate pool

mod bm25;
mod hybrid;
mod rerank;

pub use bm25::{tokenize, Bm25Index, BM25_B, BM25_K1};
pub use hybrid::{score_chunks, sort_scored, HybridIndex, BM25_WEIGHT, VECTOR_WEIGHT};
pub use rerank::rerank_candidates;
