//! Engine configuration
//!
//! The server binary binds these fields to environment variables via clap;
//! the library takes a plain struct so tests can construct one directly.

use std::path::PathBuf;

/// Tuning and feature flags for the retrieval engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Snapshot root directory (`RAG_CACHE_DIR`)
    pub cache_dir: PathBuf,
    /// When set, the relational backend replaces the in-memory indices
    pub database_url: Option<String>,
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters
    pub chunk_overlap: usize,
    /// Enable LLM reranking of the candidate pool
    pub reranker: bool,
    /// Enable LLM query rewriting before embedding
    pub query_rewrite: bool,
    /// Enable entity-graph context attachment
    pub graph: bool,
    /// Enable counting-query decomposition
    pub decompose: bool,
    /// Overfetch size when the reranker is enabled
    pub rerank_overfetch: usize,
    /// Atomic facts fetched per query
    pub fact_search_limit: usize,
    /// Additive boost for chunks whose session matched a fact
    pub fact_session_boost: f32,
    /// BFS depth bound for graph context
    pub max_hops: usize,
    /// Sub-query cap for counting-query decomposition
    pub max_subqueries: usize,
    /// Sessions per extraction batch
    pub extraction_batch_size: usize,
    /// Process-wide cap on in-flight extractor calls
    pub extraction_concurrency: usize,
    /// Texts per embedder batch call
    pub embed_batch_size: usize,
    /// Default result limit when the request omits one
    pub default_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data/cache/rag"),
            database_url: None,
            chunk_size: 1600,
            chunk_overlap: 320,
            reranker: true,
            query_rewrite: false,
            graph: true,
            decompose: true,
            rerank_overfetch: 10,
            fact_search_limit: 30,
            fact_session_boost: 0.1,
            max_hops: 2,
            max_subqueries: 5,
            extraction_batch_size: 10,
            extraction_concurrency: 300,
            embed_batch_size: 100,
            default_limit: 10,
        }
    }
}

impl EngineConfig {
    /// Clamp a requested result limit into [1, 100]
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.default_limit).clamp(1, 100)
    }
}
