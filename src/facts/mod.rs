//! Atomic-fact store and parent-chunk injection
//!
//! Facts are short extracted lines embedded independently of their parent
//! chunks. At query time the top facts boost sibling chunks of the same
//! session and pull their containing passages into the result set by
//! substring match, so extraction drift cannot corrupt the linkage.

use std::collections::{HashMap, HashSet};

use crate::embedding::cosine_similarity;
use crate::types::{AtomicFact, Chunk, ScoredChunk};

/// How many top facts fetch their parent chunks for injection
pub const INJECTION_FACT_LIMIT: usize = 10;

/// A fact scored against a query embedding
#[derive(Debug, Clone)]
pub struct ScoredFact {
    pub fact: AtomicFact,
    pub score: f32,
}

/// Per-container atomic facts with cosine lookup
#[derive(Debug, Default)]
pub struct FactStore {
    facts: Vec<AtomicFact>,
    ids: HashSet<String>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: Vec<AtomicFact>) -> Self {
        let ids = facts.iter().map(|f| f.id.clone()).collect();
        Self { facts, ids }
    }

    /// Add facts, skipping ids already present
    pub fn add_facts(&mut self, facts: Vec<AtomicFact>) -> usize {
        let mut added = 0;
        for fact in facts {
            if !self.ids.insert(fact.id.clone()) {
                continue;
            }
            self.facts.push(fact);
            added += 1;
        }
        added
    }

    /// Top-`limit` facts by cosine similarity
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<ScoredFact> {
        let mut scored: Vec<ScoredFact> = self
            .facts
            .iter()
            .map(|fact| ScoredFact {
                fact: fact.clone(),
                score: cosine_similarity(query_embedding, &fact.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.fact.id.cmp(&b.fact.id))
        });
        scored.truncate(limit);
        scored
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn facts(&self) -> &[AtomicFact] {
        &self.facts
    }

    pub fn has_data(&self) -> bool {
        !self.facts.is_empty()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
        self.ids.clear();
    }
}

/// Boost hybrid results whose session produced a matching fact, then
/// re-sort.
pub fn apply_session_boost(
    results: &mut [ScoredChunk],
    fact_sessions: &HashSet<String>,
    boost: f32,
) {
    for result in results.iter_mut() {
        if fact_sessions.contains(&result.chunk.session_id) {
            result.score += boost;
        }
    }
    crate::search::sort_scored(results);
}

/// Append parent chunks of the top facts: any chunk of a matched fact's
/// session whose content contains the fact line enters the result set with
/// the fact's score, unless already present. Re-sorts afterwards.
pub fn inject_parent_chunks(
    results: &mut Vec<ScoredChunk>,
    top_facts: &[ScoredFact],
    session_chunks: &HashMap<String, Vec<Chunk>>,
) {
    let mut present: HashSet<String> = results.iter().map(|r| r.chunk.id.clone()).collect();

    for scored_fact in top_facts.iter().take(INJECTION_FACT_LIMIT) {
        let Some(chunks) = session_chunks.get(&scored_fact.fact.session_id) else {
            continue;
        };
        for chunk in chunks {
            if present.contains(&chunk.id) {
                continue;
            }
            if chunk.content.contains(&scored_fact.fact.content) {
                present.insert(chunk.id.clone());
                results.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: scored_fact.score,
                    vector_score: 0.0,
                    bm25_score: 0.0,
                    rerank_score: None,
                });
            }
        }
    }

    crate::search::sort_scored(results);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(id: &str, session: &str, content: &str, embedding: Vec<f32>) -> AtomicFact {
        AtomicFact {
            id: id.to_string(),
            content: content.to_string(),
            session_id: session.to_string(),
            fact_index: 0,
            date: None,
            event_date: None,
            embedding,
        }
    }

    fn chunk(id: &str, session: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            session_id: session.to_string(),
            chunk_index: 0,
            date: None,
            event_date: None,
            embedding: vec![0.0],
        }
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut store = FactStore::new();
        store.add_facts(vec![
            fact("f1", "s1", "likes tea", vec![1.0, 0.0]),
            fact("f2", "s2", "lives in Berlin", vec![0.0, 1.0]),
        ]);

        let results = store.search(&[0.0, 1.0], 10);
        assert_eq!(results[0].fact.id, "f2");
        assert_eq!(results.len(), 2);

        let limited = store.search(&[0.0, 1.0], 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_duplicate_fact_ids_skipped() {
        let mut store = FactStore::new();
        store.add_facts(vec![fact("f1", "s1", "a", vec![1.0])]);
        let added = store.add_facts(vec![fact("f1", "s1", "a", vec![1.0])]);
        assert_eq!(added, 0);
        assert_eq!(store.fact_count(), 1);
    }

    #[test]
    fn test_session_boost_reorders() {
        let mut results = vec![
            ScoredChunk {
                chunk: chunk("c_a_0", "a", "top"),
                score: 0.8,
                vector_score: 0.8,
                bm25_score: 0.0,
                rerank_score: None,
            },
            ScoredChunk {
                chunk: chunk("c_b_0", "b", "boosted past"),
                score: 0.75,
                vector_score: 0.75,
                bm25_score: 0.0,
                rerank_score: None,
            },
        ];

        let sessions: HashSet<String> = ["b".to_string()].into_iter().collect();
        apply_session_boost(&mut results, &sessions, 0.1);

        assert_eq!(results[0].chunk.id, "c_b_0");
        assert!((results[0].score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_parent_chunk_injection_by_substring() {
        let mut results = vec![ScoredChunk {
            chunk: chunk("c_x_0", "x", "unrelated"),
            score: 0.9,
            vector_score: 0.9,
            bm25_score: 0.0,
            rerank_score: None,
        }];

        let top_facts = vec![ScoredFact {
            fact: fact("f1", "s1", "lives in Berlin", vec![]),
            score: 0.7,
        }];

        let mut session_chunks = HashMap::new();
        session_chunks.insert(
            "s1".to_string(),
            vec![
                chunk("c_s1_0", "s1", "The user lives in Berlin and works remotely."),
                chunk("c_s1_1", "s1", "No match here."),
            ],
        );

        inject_parent_chunks(&mut results, &top_facts, &session_chunks);

        assert_eq!(results.len(), 2);
        let injected = results.iter().find(|r| r.chunk.id == "c_s1_0").unwrap();
        assert!((injected.score - 0.7).abs() < 1e-6);
        assert_eq!(injected.vector_score, 0.0);
    }

    #[test]
    fn test_injection_never_duplicates() {
        let shared = chunk("c_s1_0", "s1", "lives in Berlin");
        let mut results = vec![ScoredChunk {
            chunk: shared.clone(),
            score: 0.9,
            vector_score: 0.9,
            bm25_score: 0.1,
            rerank_score: None,
        }];

        let top_facts = vec![ScoredFact {
            fact: fact("f1", "s1", "lives in Berlin", vec![]),
            score: 0.7,
        }];
        let mut session_chunks = HashMap::new();
        session_chunks.insert("s1".to_string(), vec![shared]);

        inject_parent_chunks(&mut results, &top_facts, &session_chunks);
        assert_eq!(results.len(), 1);
        // Existing entry keeps its hybrid score
        assert!((results[0].score - 0.9).abs() < 1e-6);
    }
}
