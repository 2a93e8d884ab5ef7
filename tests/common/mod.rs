//! Shared test doubles: a deterministic bag-of-words embedder and a
//! scripted chat model that dispatches on the calling prompt.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use recall::embedding::Embedder;
use recall::error::Result;
use recall::llm::ChatModel;
use recall::{Engine, EngineConfig, Session, Turn};

pub const DIMS: usize = 64;

/// Deterministic token-hash embedder: texts sharing words get similar
/// vectors, so relevance assertions are stable without a network.
pub struct HashEmbedder;

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    for token in cleaned.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() % DIMS as u64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

/// Scripted chat model. Responses are selected by which pipeline stage is
/// calling, recognized from the system prompt. Scripts are mutable so a
/// test can change behavior between ingests.
#[derive(Default)]
pub struct StubChat {
    extraction: Mutex<String>,
    profile: Mutex<String>,
    decompose: Mutex<String>,
    rerank: Mutex<String>,
    /// Extraction calls whose prompt contains this marker fail
    fail_marker: Mutex<Option<String>>,
    pub extraction_calls: AtomicUsize,
    pub decompose_calls: AtomicUsize,
    pub rerank_calls: AtomicUsize,
}

impl StubChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_extraction(&self, payload: &str) {
        *self.extraction.lock().unwrap() = payload.to_string();
    }

    pub fn set_profile(&self, payload: &str) {
        *self.profile.lock().unwrap() = payload.to_string();
    }

    pub fn set_decompose(&self, payload: &str) {
        *self.decompose.lock().unwrap() = payload.to_string();
    }

    pub fn set_rerank(&self, payload: &str) {
        *self.rerank.lock().unwrap() = payload.to_string();
    }

    pub fn set_fail_marker(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }
}

#[async_trait]
impl ChatModel for StubChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if system.contains("distill") {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_marker.lock().unwrap().as_deref() {
                if user.contains(marker) {
                    return Err(recall::RecallError::External("extractor down".to_string()));
                }
            }
            Ok(self.extraction.lock().unwrap().clone())
        } else if system.contains("biographical profile") {
            Ok(self.profile.lock().unwrap().clone())
        } else if system.contains("counting question") {
            self.decompose_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decompose.lock().unwrap().clone())
        } else if system.contains("score search results") {
            self.rerank_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rerank.lock().unwrap().clone())
        } else {
            Ok(String::new())
        }
    }

    fn model_name(&self) -> &str {
        "stub-chat"
    }
}

pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        cache_dir: dir.path().to_path_buf(),
        reranker: false,
        query_rewrite: false,
        ..EngineConfig::default()
    }
}

pub fn build_engine(config: EngineConfig, chat: Arc<StubChat>) -> Engine {
    Engine::new(config, Arc::new(HashEmbedder), chat).unwrap()
}

pub fn session(id: &str, content: &str, date: Option<&str>) -> Session {
    Session {
        session_id: id.to_string(),
        turns: vec![Turn {
            role: "user".to_string(),
            content: content.to_string(),
        }],
        date: date.map(String::from),
    }
}
