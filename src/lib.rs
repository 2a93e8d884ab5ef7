//! Recall - long-term memory retrieval for conversational agents
//!
//! Ingests multi-turn conversation sessions, derives chunks, atomic facts,
//! an entity graph, and a user profile per container, and answers retrieval
//! requests with a ranked heterogeneous list of passages and structured
//! context for a downstream language model.

pub mod chunker;
pub mod config;
pub mod container;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod facts;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod profile;
pub mod query;
pub mod search;
pub mod server;
pub mod singleflight;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{RecallError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
