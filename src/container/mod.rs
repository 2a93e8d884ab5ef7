//! Container registry and per-tag locking
//!
//! A container is an isolated namespace holding all indices for one tag.
//! Each container owns a single reader/writer lock: searches and snapshot
//! serialization take it shared, ingest commits and disk loads take it
//! exclusive. Nothing else is shared between containers.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::facts::FactStore;
use crate::graph::EntityGraph;
use crate::profile::ProfileStore;
use crate::search::HybridIndex;
use crate::storage::SnapshotData;

/// All in-memory state of one container
#[derive(Default)]
pub struct MemoryIndices {
    pub hybrid: HybridIndex,
    pub facts: FactStore,
    pub graph: EntityGraph,
    pub profile: ProfileStore,
    /// Set once the snapshot has been loaded (or first written), so the
    /// lazy loader runs at most once per process per tag
    pub loaded: bool,
}

impl MemoryIndices {
    pub fn from_snapshot(data: SnapshotData) -> Self {
        Self {
            hybrid: HybridIndex::from_chunks(data.chunks),
            facts: FactStore::from_facts(data.facts),
            graph: EntityGraph::from_snapshot(data.graph),
            profile: ProfileStore::from_facts(data.profile),
            loaded: true,
        }
    }

    pub fn to_snapshot(&self) -> SnapshotData {
        SnapshotData {
            chunks: self.hybrid.chunks().to_vec(),
            graph: self.graph.to_snapshot(),
            facts: self.facts.facts().to_vec(),
            profile: self.profile.facts().to_vec(),
        }
    }

    pub fn clear(&mut self) {
        self.hybrid.clear();
        self.facts.clear();
        self.graph.clear();
        self.profile.clear();
        self.loaded = true;
    }
}

/// One tag's namespace: the indices behind their lock
pub struct Container {
    pub tag: String,
    pub state: RwLock<MemoryIndices>,
}

impl Container {
    fn new(tag: String) -> Self {
        Self {
            tag,
            state: RwLock::new(MemoryIndices::default()),
        }
    }
}

/// Owning map from tag to container
#[derive(Default)]
pub struct ContainerRegistry {
    containers: DashMap<String, Arc<Container>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, tag: &str) -> Arc<Container> {
        self.containers
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Container::new(tag.to_string())))
            .clone()
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Container>> {
        self.containers.get(tag).map(|c| c.clone())
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.containers.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_stable() {
        let registry = ContainerRegistry::new();
        let a = registry.get_or_create("alice");
        let b = registry.get_or_create("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.tags(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_resets_state() {
        let registry = ContainerRegistry::new();
        let container = registry.get_or_create("t");
        {
            let mut state = container.state.write().await;
            state.graph.add_entity("alice", "person", "", "s1");
            state.loaded = true;
        }
        {
            let mut state = container.state.write().await;
            state.clear();
        }
        let state = container.state.read().await;
        assert!(!state.graph.has_data());
        assert!(state.loaded);
    }
}
