//! Hybrid search engine
//!
//! Owns a container's chunks plus the BM25 postings over them. Dense and
//! sparse scores are min-max normalized across the candidate pool per
//! query, then fused by weighted sum.

use std::collections::HashSet;

use crate::embedding::cosine_similarity;
use crate::types::{Chunk, ScoredChunk};

use super::bm25::Bm25Index;

/// Weight of the normalized cosine score in the fused score
pub const VECTOR_WEIGHT: f32 = 0.7;
/// Weight of the normalized BM25 score in the fused score
pub const BM25_WEIGHT: f32 = 0.3;

/// Per-container chunk store with a sparse index
#[derive(Debug, Default)]
pub struct HybridIndex {
    chunks: Vec<Chunk>,
    ids: HashSet<String>,
    bm25: Bm25Index,
}

impl HybridIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted chunks (postings are derived, not stored)
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let ids = chunks.iter().map(|c| c.id.clone()).collect();
        let bm25 = Bm25Index::from_contents(chunks.iter().map(|c| c.content.as_str()));
        Self { chunks, ids, bm25 }
    }

    /// Add chunks, skipping ids already present so re-ingesting a session
    /// produces no net change.
    pub fn add_chunks(&mut self, chunks: Vec<Chunk>) -> usize {
        let mut added = 0;
        for chunk in chunks {
            if !self.ids.insert(chunk.id.clone()) {
                continue;
            }
            self.bm25.add_document(&chunk.content);
            self.chunks.push(chunk);
            added += 1;
        }
        added
    }

    /// Top-k fused search over the whole container
    pub fn search(&self, query_embedding: &[f32], raw_query: &str, k: usize) -> Vec<ScoredChunk> {
        let mut scored = score_chunks(&self.chunks, &self.bm25, query_embedding, raw_query);
        sort_scored(&mut scored);
        scored.truncate(k);
        scored
    }

    pub fn chunks_by_session(&self, session_id: &str) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ids.contains(chunk_id)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn has_data(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.ids.clear();
        self.bm25.clear();
    }
}

/// Score a chunk pool: fused = 0.7 * minmax(cosine) + 0.3 * minmax(bm25).
///
/// `bm25` ordinals must correspond to `chunks` indices. The relational
/// backend builds a transient index over the pool it loads; the in-memory
/// engine passes its persistent one.
pub fn score_chunks(
    chunks: &[Chunk],
    bm25: &Bm25Index,
    query_embedding: &[f32],
    raw_query: &str,
) -> Vec<ScoredChunk> {
    if chunks.is_empty() {
        return vec![];
    }

    let vector_scores: Vec<f32> = chunks
        .iter()
        .map(|c| cosine_similarity(query_embedding, &c.embedding))
        .collect();
    let bm25_scores = bm25.score_all(raw_query);

    let vector_norm = min_max_normalize(&vector_scores);
    let bm25_norm = min_max_normalize(&bm25_scores);

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| ScoredChunk {
            chunk: chunk.clone(),
            score: VECTOR_WEIGHT * vector_norm[i] + BM25_WEIGHT * bm25_norm[i],
            vector_score: vector_scores[i],
            bm25_score: bm25_scores[i],
            rerank_score: None,
        })
        .collect()
}

/// Deterministic ordering: fused score, then raw cosine, then id
pub fn sort_scored(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Min-max normalize into [0, 1] across the pool. A flat pool maps to 1.0
/// when positive, else 0.0, so a single strong candidate is not zeroed.
fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    if max > min {
        scores.iter().map(|s| (s - min) / (max - min)).collect()
    } else {
        let flat = if max > 0.0 { 1.0 } else { 0.0 };
        vec![flat; scores.len()]
    }
}
