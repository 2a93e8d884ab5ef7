//! Query pipeline
//!
//! Rewrite (optional), embed, retrieve over every index under the
//! container's read lock, expand counting queries, apply fact boost and
//! parent-chunk injection, rerank (optional), then assemble chunks, graph
//! context, and the profile record into one heterogeneous list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::container::Container;
use crate::embedding::embed_with_retry;
use crate::engine::Engine;
use crate::error::{RecallError, Result};
use crate::facts::{apply_session_boost, inject_parent_chunks, FactStore, ScoredFact, INJECTION_FACT_LIMIT};
use crate::graph::{EntityGraph, GraphContext};
use crate::profile::ProfileStore;
use crate::search::{rerank_candidates, score_chunks, sort_scored, Bm25Index};
use crate::storage::Backend;
use crate::types::{Chunk, RetrievedItem, ScoredChunk};

static COUNTING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(how many|how much|count|number of|total)\b").expect("valid counting regex")
});

const REWRITE_SYSTEM: &str = "\
Rewrite the search query to maximize recall against a store of personal \
memory notes: expand abbreviations and add closely related phrasings. \
Respond with the rewritten query as a single line and nothing else.";

const DECOMPOSE_SYSTEM: &str = "\
The user asks a counting question over their personal memories. Break it \
into concrete sub-queries that each retrieve one likely instance, period, or \
category. Respond with one sub-query per line, at most five lines, nothing \
else.";

/// Whether a query asks for a count or total
pub fn is_counting_query(query: &str) -> bool {
    COUNTING_RE.is_match(query)
}

/// Everything gathered under one read-lock scope
struct RetrievedPool {
    results: Vec<ScoredChunk>,
    fact_matches: Vec<ScoredFact>,
    session_chunks: HashMap<String, Vec<Chunk>>,
    seeds: Vec<String>,
    graph_context: GraphContext,
    profile_facts: Vec<String>,
}

impl Engine {
    /// Answer a retrieval request for a container. A query against a
    /// container with no data returns an empty list.
    pub async fn search(
        &self,
        tag: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RetrievedItem>> {
        let limit = self.config.clamp_limit(limit);
        let overfetch = limit.max(self.config.rerank_overfetch);

        let effective = if self.config.query_rewrite {
            self.rewrite_query(query).await
        } else {
            query.to_string()
        };

        let query_embedding = embed_with_retry(&self.embedder, &[effective.clone()])
            .await?
            .pop()
            .ok_or_else(|| RecallError::External("embedder returned no vectors".to_string()))?;

        let container = self.registry.get_or_create(tag);
        self.ensure_loaded(&container).await;

        let mut pool = self
            .collect_pool(&container, tag, &query_embedding, &effective, query, overfetch)
            .await?;

        if self.config.decompose && is_counting_query(query) {
            let subqueries = self.decompose_query(query).await;
            if !subqueries.is_empty() {
                tracing::debug!(tag = %tag, count = subqueries.len(), "expanding counting query");
                self.union_subqueries(&container, tag, &mut pool.results, &subqueries, overfetch)
                    .await;
            }
        }

        let fact_sessions: HashSet<String> = pool
            .fact_matches
            .iter()
            .map(|f| f.fact.session_id.clone())
            .collect();
        apply_session_boost(
            &mut pool.results,
            &fact_sessions,
            self.config.fact_session_boost,
        );
        inject_parent_chunks(&mut pool.results, &pool.fact_matches, &pool.session_chunks);

        let mut results = pool.results;
        if self.config.reranker && results.len() > limit {
            if let Some(scores) = rerank_candidates(&self.chat, query, &results).await {
                for (result, score) in results.iter_mut().zip(scores.iter()) {
                    result.rerank_score = Some(*score);
                }
                results.sort_by(|a, b| {
                    b.rerank_score
                        .partial_cmp(&a.rerank_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            b.score
                                .partial_cmp(&a.score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                });
            }
        }
        results.truncate(limit);

        let mut items: Vec<RetrievedItem> =
            results.iter().map(RetrievedItem::from_scored_chunk).collect();

        if self.config.graph && !pool.seeds.is_empty() {
            for node in &pool.graph_context.nodes {
                items.push(RetrievedItem::from_entity(node));
            }
            for edge in &pool.graph_context.edges {
                items.push(RetrievedItem::from_relationship(edge));
            }
        }

        if !pool.profile_facts.is_empty() {
            let profile = ProfileStore::from_facts(pool.profile_facts.clone());
            items.push(RetrievedItem::Profile {
                content: profile.format_block(),
                score: 1.0,
            });
        }

        Ok(items)
    }

    /// Main retrieval: hybrid search, fact search, entity discovery, plus
    /// the chunk and profile context the later stages need, all observed
    /// under one read-lock scope so a concurrent commit is seen entirely
    /// or not at all.
    async fn collect_pool(
        &self,
        container: &Arc<Container>,
        tag: &str,
        query_embedding: &[f32],
        effective_query: &str,
        raw_query: &str,
        overfetch: usize,
    ) -> Result<RetrievedPool> {
        match &self.backend {
            Backend::Memory(_) => {
                let state = container.state.read().await;
                let results = state.hybrid.search(query_embedding, effective_query, overfetch);
                let fact_matches = state
                    .facts
                    .search(query_embedding, self.config.fact_search_limit);

                let seeds = if self.config.graph {
                    state.graph.entities_in_query(raw_query)
                } else {
                    vec![]
                };
                let graph_context = if seeds.is_empty() {
                    GraphContext::default()
                } else {
                    state.graph.neighborhood(&seeds, self.config.max_hops)
                };

                let mut session_chunks = HashMap::new();
                for scored in fact_matches.iter().take(INJECTION_FACT_LIMIT) {
                    let session_id = &scored.fact.session_id;
                    if !session_chunks.contains_key(session_id) {
                        session_chunks.insert(
                            session_id.clone(),
                            state.hybrid.chunks_by_session(session_id),
                        );
                    }
                }

                Ok(RetrievedPool {
                    results,
                    fact_matches,
                    session_chunks,
                    seeds,
                    graph_context,
                    profile_facts: state.profile.facts().to_vec(),
                })
            }
            Backend::Relational(store) => {
                let _guard = container.state.read().await;

                let all_chunks = store.load_chunks(tag)?;
                let bm25 = Bm25Index::from_contents(all_chunks.iter().map(|c| c.content.as_str()));
                let mut results = score_chunks(&all_chunks, &bm25, query_embedding, effective_query);
                sort_scored(&mut results);
                results.truncate(overfetch);

                let fact_store = FactStore::from_facts(store.load_facts(tag)?);
                let fact_matches = fact_store.search(query_embedding, self.config.fact_search_limit);

                let graph = EntityGraph::from_snapshot(store.load_graph(tag)?);
                let seeds = if self.config.graph {
                    graph.entities_in_query(raw_query)
                } else {
                    vec![]
                };
                let graph_context = if seeds.is_empty() {
                    GraphContext::default()
                } else {
                    graph.neighborhood(&seeds, self.config.max_hops)
                };

                let mut session_chunks: HashMap<String, Vec<Chunk>> = HashMap::new();
                for scored in fact_matches.iter().take(INJECTION_FACT_LIMIT) {
                    let session_id = &scored.fact.session_id;
                    if !session_chunks.contains_key(session_id) {
                        let chunks = all_chunks
                            .iter()
                            .filter(|c| &c.session_id == session_id)
                            .cloned()
                            .collect();
                        session_chunks.insert(session_id.clone(), chunks);
                    }
                }

                Ok(RetrievedPool {
                    results,
                    fact_matches,
                    session_chunks,
                    seeds,
                    graph_context,
                    profile_facts: store.load_profile(tag)?,
                })
            }
        }
    }

    /// Hybrid search only, for sub-queries
    async fn hybrid_pool(
        &self,
        container: &Arc<Container>,
        tag: &str,
        query_embedding: &[f32],
        raw_query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        match &self.backend {
            Backend::Memory(_) => {
                let state = container.state.read().await;
                Ok(state.hybrid.search(query_embedding, raw_query, k))
            }
            Backend::Relational(store) => {
                let _guard = container.state.read().await;
                let all_chunks = store.load_chunks(tag)?;
                let bm25 = Bm25Index::from_contents(all_chunks.iter().map(|c| c.content.as_str()));
                let mut results = score_chunks(&all_chunks, &bm25, query_embedding, raw_query);
                sort_scored(&mut results);
                results.truncate(k);
                Ok(results)
            }
        }
    }

    /// Search each sub-query and union into `results` keyed by
    /// `(session_id, chunk_index)`, then re-sort by score.
    async fn union_subqueries(
        &self,
        container: &Arc<Container>,
        tag: &str,
        results: &mut Vec<ScoredChunk>,
        subqueries: &[String],
        overfetch: usize,
    ) {
        let mut seen: HashSet<(String, usize)> = results
            .iter()
            .map(|r| (r.chunk.session_id.clone(), r.chunk.chunk_index))
            .collect();

        for sub in subqueries {
            let embedding = match embed_with_retry(&self.embedder, &[sub.clone()]).await {
                Ok(mut vectors) => match vectors.pop() {
                    Some(v) => v,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "sub-query embedding failed, skipping");
                    continue;
                }
            };

            match self.hybrid_pool(container, tag, &embedding, sub, overfetch).await {
                Ok(sub_results) => {
                    for result in sub_results {
                        let key = (result.chunk.session_id.clone(), result.chunk.chunk_index);
                        if seen.insert(key) {
                            results.push(result);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sub-query search failed, skipping");
                }
            }
        }

        sort_scored(results);
    }

    /// Single-line LLM query expansion; the original query on any failure
    async fn rewrite_query(&self, query: &str) -> String {
        match self.chat.complete(REWRITE_SYSTEM, query).await {
            Ok(response) => {
                let line = response.trim();
                if !line.is_empty() && !line.contains('\n') && line.len() < 500 {
                    line.to_string()
                } else {
                    tracing::debug!("rewrite output rejected, keeping original query");
                    query.to_string()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "query rewrite failed, keeping original");
                query.to_string()
            }
        }
    }

    /// LLM decomposition of a counting query into sub-queries; empty on
    /// failure
    async fn decompose_query(&self, query: &str) -> Vec<String> {
        match self.chat.complete(DECOMPOSE_SYSTEM, query).await {
            Ok(response) => response
                .lines()
                .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
                .filter(|line| !line.is_empty())
                .take(self.config.max_subqueries)
                .map(String::from)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition failed, using single query");
                vec![]
            }
        }
    }
}
