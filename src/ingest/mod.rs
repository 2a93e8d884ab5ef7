//! Ingest orchestrator
//!
//! Fans extraction out over batches under the global semaphore, commits
//! graph records, embeds chunks and facts while the profile is assembled,
//! and commits everything under the container's writer lock. A failed
//! session is skipped; the rest of the batch proceeds.

use futures::future::join_all;

use crate::chunker::chunk_text;
use crate::engine::{today, Engine};
use crate::error::{RecallError, Result};
use crate::extract::{fact_lines, Extraction};
use crate::graph::normalize_name;
use crate::profile::{assemble_profile, ProfileStore};
use crate::storage::Backend;
use crate::types::{AtomicFact, Chunk, RelationshipEdge, Session};

impl Engine {
    /// Ingest a batch of sessions into a container. Returns the chunk ids
    /// derived from the batch; per-session extraction failures are logged
    /// and skipped.
    pub async fn ingest(&self, tag: &str, sessions: Vec<Session>) -> Result<Vec<String>> {
        if sessions.is_empty() {
            return Ok(vec![]);
        }

        let container = self.registry.get_or_create(tag);
        self.ensure_loaded(&container).await;

        // Extraction fan-out, bounded by the global semaphore. The client
        // deduplicates concurrent calls and caches by session id.
        let mut extracted: Vec<(Session, Extraction)> = Vec::with_capacity(sessions.len());
        let total = sessions.len();
        for batch in sessions.chunks(self.config.extraction_batch_size) {
            let futures = batch.iter().map(|session| self.extractor.extract(session));
            for (session, outcome) in batch.iter().zip(join_all(futures).await) {
                if let Some(extraction) = outcome {
                    extracted.push((session.clone(), extraction));
                }
            }
        }

        let failed = total - extracted.len();
        if failed > 0 {
            let partial = RecallError::Partial { failed, total };
            tracing::warn!(tag = %tag, error = %partial, "sessions skipped during ingest");
        }

        // Graph records commit first, under the writer lock
        match &self.backend {
            Backend::Memory(_) => {
                let mut state = container.state.write().await;
                for (session, extraction) in &extracted {
                    for entity in &extraction.entities {
                        state.graph.add_entity(
                            &entity.name,
                            &entity.entity_type,
                            &entity.summary,
                            &session.session_id,
                        );
                    }
                    for rel in &extraction.relationships {
                        state.graph.add_relationship(
                            &rel.source,
                            &rel.relation,
                            &rel.target,
                            rel.date.clone(),
                            &session.session_id,
                        );
                    }
                }
            }
            Backend::Relational(store) => {
                let _guard = container.state.write().await;
                for (session, extraction) in &extracted {
                    for entity in &extraction.entities {
                        store.upsert_entity(
                            tag,
                            &normalize_name(&entity.name),
                            &entity.entity_type,
                            &entity.summary,
                            &session.session_id,
                        )?;
                    }
                    for rel in &extraction.relationships {
                        store.add_relationship(
                            tag,
                            &RelationshipEdge {
                                source: normalize_name(&rel.source),
                                target: normalize_name(&rel.target),
                                relation: rel.relation.clone(),
                                date: rel.date.clone(),
                                session_id: session.session_id.clone(),
                            },
                        )?;
                    }
                }
            }
        }

        // Chunk and fact construction from the distilled memories
        let mut chunk_specs: Vec<(String, usize, String, Option<String>)> = Vec::new();
        let mut fact_specs: Vec<(String, usize, String, Option<String>, Option<String>)> =
            Vec::new();
        let mut all_memories = String::new();

        for (session, extraction) in &extracted {
            if extraction.memories_text.trim().is_empty() {
                continue;
            }
            let date = session.date.clone().unwrap_or_else(today);

            let rendered = format!("# Memories from {}\n\n{}", date, extraction.memories_text);
            for (i, content) in chunk_text(&rendered, self.config.chunk_size, self.config.chunk_overlap)
                .into_iter()
                .enumerate()
            {
                chunk_specs.push((session.session_id.clone(), i, content, Some(date.clone())));
            }

            for (i, (content, event_date)) in fact_lines(&extraction.memories_text)
                .into_iter()
                .enumerate()
            {
                fact_specs.push((
                    session.session_id.clone(),
                    i,
                    content,
                    Some(date.clone()),
                    event_date,
                ));
            }

            all_memories.push_str(&extraction.memories_text);
            all_memories.push('\n');
        }

        // Embed chunks and facts while the profile is assembled
        let chunk_texts: Vec<String> = chunk_specs.iter().map(|(_, _, c, _)| c.clone()).collect();
        let fact_texts: Vec<String> = fact_specs.iter().map(|(_, _, c, _, _)| c.clone()).collect();

        let (chunk_embeddings, fact_embeddings, profile_candidates) = tokio::join!(
            self.embed_all(&chunk_texts),
            self.embed_all(&fact_texts),
            assemble_profile(self.chat.as_ref(), &all_memories),
        );
        let chunk_embeddings = chunk_embeddings?;
        let fact_embeddings = fact_embeddings?;

        let chunks: Vec<Chunk> = chunk_specs
            .into_iter()
            .zip(chunk_embeddings)
            .map(|((session_id, index, content, date), embedding)| Chunk {
                id: Chunk::make_id(tag, &session_id, index),
                content,
                session_id,
                chunk_index: index,
                date,
                event_date: None,
                embedding,
            })
            .collect();

        let facts: Vec<AtomicFact> = fact_specs
            .into_iter()
            .zip(fact_embeddings)
            .map(
                |((session_id, index, content, date, event_date), embedding)| AtomicFact {
                    id: format!("{}_{}_fact_{}", tag, session_id, index),
                    content,
                    session_id,
                    fact_index: index,
                    date,
                    event_date,
                    embedding,
                },
            )
            .collect();

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        // Commit under the writer lock
        match &self.backend {
            Backend::Memory(_) => {
                {
                    let mut state = container.state.write().await;
                    state.hybrid.add_chunks(chunks);
                    state.facts.add_facts(facts);
                    state.profile.merge(profile_candidates);
                    state.loaded = true;
                }
                self.snapshot_container(&container).await;
            }
            Backend::Relational(store) => {
                let _guard = container.state.write().await;
                store.add_chunks(tag, &chunks)?;
                store.add_facts(tag, &facts)?;
                let mut profile = ProfileStore::from_facts(store.load_profile(tag)?);
                profile.merge(profile_candidates);
                store.save_profile(tag, profile.facts())?;
            }
        }

        tracing::info!(
            tag = %tag,
            sessions = total,
            skipped = failed,
            chunks = chunk_ids.len(),
            "ingest committed"
        );
        Ok(chunk_ids)
    }

    /// Embed texts in fixed-size batches with retry
    pub(crate) async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size) {
            out.extend(crate::embedding::embed_with_retry(&self.embedder, batch).await?);
        }
        Ok(out)
    }
}
