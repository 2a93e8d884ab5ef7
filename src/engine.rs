//! Engine composition root
//!
//! Owns the providers, the container registry, and the active backend.
//! Ingest and query pipelines live in their own modules as `impl Engine`
//! blocks; this file carries construction and container lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::chunker::chunk_text;
use crate::config::EngineConfig;
use crate::container::{Container, ContainerRegistry, MemoryIndices};
use crate::embedding::{embed_with_retry, Embedder};
use crate::error::Result;
use crate::extract::ExtractorClient;
use crate::llm::ChatModel;
use crate::singleflight::SingleFlight;
use crate::storage::{Backend, RelationalStore, SnapshotStore};
use crate::types::Chunk;

/// The retrieval engine: one per process, containers within
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) chat: Arc<dyn ChatModel>,
    pub(crate) extractor: ExtractorClient,
    pub(crate) registry: ContainerRegistry,
    pub(crate) backend: Backend,
    /// Single-flight guard for lazy snapshot loads, keyed by tag
    loader: SingleFlight<String, ()>,
}

impl Engine {
    /// Build an engine. Opens the relational backend when `database_url`
    /// is set; otherwise containers snapshot under `cache_dir`.
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let backend = match &config.database_url {
            Some(url) => {
                tracing::info!(url = %url, "using relational backend");
                Backend::Relational(RelationalStore::open(url)?)
            }
            None => Backend::Memory(SnapshotStore::new(config.cache_dir.clone())),
        };

        let extractor = ExtractorClient::new(chat.clone(), config.extraction_concurrency);

        Ok(Self {
            config,
            embedder,
            chat,
            extractor,
            registry: ContainerRegistry::new(),
            backend,
            loader: SingleFlight::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_relational(&self) -> bool {
        self.backend.is_relational()
    }

    /// Lazily load a container's snapshot on first use (memory backend).
    /// Concurrent callers share one load; the writer lock makes the load
    /// atomic with respect to searches.
    pub(crate) async fn ensure_loaded(&self, container: &Arc<Container>) {
        let Backend::Memory(snapshots) = &self.backend else {
            return;
        };
        if container.state.read().await.loaded {
            return;
        }

        self.loader
            .run(container.tag.clone(), || async {
                let mut state = container.state.write().await;
                if state.loaded {
                    return;
                }
                let data = snapshots.load(&container.tag);
                let loaded = MemoryIndices::from_snapshot(data);
                tracing::debug!(
                    tag = %container.tag,
                    chunks = loaded.hybrid.len(),
                    facts = loaded.facts.fact_count(),
                    "loaded container snapshot"
                );
                *state = loaded;
            })
            .await;
    }

    /// Snapshot a container to disk. The in-memory state is authoritative;
    /// a write failure is logged and the caller proceeds.
    pub(crate) async fn snapshot_container(&self, container: &Arc<Container>) {
        let Backend::Memory(snapshots) = &self.backend else {
            return;
        };
        let data = {
            let state = container.state.read().await;
            state.to_snapshot()
        };
        if let Err(e) = snapshots.save(&container.tag, &data) {
            tracing::warn!(tag = %container.tag, error = %e, "snapshot write failed");
        }
    }

    /// Drop all state for a container
    pub async fn clear(&self, tag: &str) -> Result<()> {
        let container = self.registry.get_or_create(tag);

        match &self.backend {
            Backend::Memory(snapshots) => {
                let mut state = container.state.write().await;
                let sessions: BTreeSet<String> = state
                    .hybrid
                    .chunks()
                    .iter()
                    .map(|c| c.session_id.clone())
                    .collect();
                state.clear();
                drop(state);
                self.extractor.invalidate(sessions);
                snapshots.clear(tag)?;
            }
            Backend::Relational(store) => {
                let _guard = container.state.write().await;
                let sessions = store.session_ids(tag)?;
                store.clear_container(tag)?;
                self.extractor.invalidate(sessions);
            }
        }

        tracing::info!(tag = %tag, "cleared container");
        Ok(())
    }

    /// Known container tags: live containers with data plus snapshot
    /// directories (or relational rows)
    pub async fn containers(&self) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Memory(snapshots) => {
                let mut tags: BTreeSet<String> = snapshots.list().into_iter().collect();
                for tag in self.registry.tags() {
                    if let Some(container) = self.registry.get(&tag) {
                        let state = container.state.read().await;
                        if state.hybrid.has_data()
                            || state.facts.has_data()
                            || state.graph.has_data()
                            || !state.profile.is_empty()
                        {
                            tags.insert(tag);
                        }
                    }
                }
                Ok(tags.into_iter().collect())
            }
            Backend::Relational(store) => store.list_containers(),
        }
    }

    /// Ingest raw text without extraction: chunk, embed, commit.
    /// The session id is a digest of the text, so identical stores are
    /// idempotent.
    pub async fn store_text(&self, tag: &str, text: &str) -> Result<Vec<String>> {
        let digest = Sha256::digest(text.as_bytes());
        let session_id = format!("store_{}", &hex::encode(digest)[..16]);
        let date = today();

        let contents = chunk_text(text, self.config.chunk_size, self.config.chunk_overlap);
        if contents.is_empty() {
            return Ok(vec![]);
        }

        let mut embeddings = Vec::with_capacity(contents.len());
        for batch in contents.chunks(self.config.embed_batch_size) {
            embeddings.extend(embed_with_retry(&self.embedder, batch).await?);
        }

        let chunks: Vec<Chunk> = contents
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (content, embedding))| Chunk {
                id: Chunk::make_id(tag, &session_id, i),
                content,
                session_id: session_id.clone(),
                chunk_index: i,
                date: Some(date.clone()),
                event_date: None,
                embedding,
            })
            .collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let container = self.registry.get_or_create(tag);
        match &self.backend {
            Backend::Memory(_) => {
                self.ensure_loaded(&container).await;
                {
                    let mut state = container.state.write().await;
                    state.hybrid.add_chunks(chunks);
                    state.loaded = true;
                }
                self.snapshot_container(&container).await;
            }
            Backend::Relational(store) => {
                let _guard = container.state.write().await;
                store.add_chunks(tag, &chunks)?;
            }
        }

        tracing::info!(tag = %tag, session_id = %session_id, chunks = ids.len(), "stored text");
        Ok(ids)
    }
}

/// Today's date as YYYY-MM-DD (UTC)
pub(crate) fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
