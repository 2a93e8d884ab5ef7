//! On-disk container snapshots
//!
//! One directory per container holding at most four JSON files, each
//! written to a temp file and renamed into place. Reads tolerate any
//! subset existing; a corrupt file is logged and treated as missing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{RecallError, Result};
use crate::graph::GraphSnapshot;
use crate::types::{AtomicFact, Chunk};

/// Snapshot file format version
const SNAPSHOT_VERSION: u32 = 1;

const SEARCH_FILE: &str = "search.json";
const GRAPH_FILE: &str = "graph.json";
const FACTS_FILE: &str = "facts.json";
const PROFILE_FILE: &str = "profile.json";

/// Everything a container persists
#[derive(Debug, Default)]
pub struct SnapshotData {
    pub chunks: Vec<Chunk>,
    pub graph: GraphSnapshot,
    pub facts: Vec<AtomicFact>,
    pub profile: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct SearchFile {
    version: u32,
    #[serde(default)]
    chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct GraphFile {
    version: u32,
    #[serde(default)]
    nodes: Vec<crate::types::EntityNode>,
    #[serde(default)]
    edges: Vec<crate::types::RelationshipEdge>,
}

#[derive(Serialize, Deserialize)]
struct FactsFile {
    version: u32,
    #[serde(default)]
    facts: Vec<AtomicFact>,
}

#[derive(Serialize, Deserialize)]
struct ProfileFile {
    version: u32,
    #[serde(default)]
    facts: Vec<String>,
}

/// Per-container snapshot directory manager
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn container_dir(&self, tag: &str) -> PathBuf {
        self.root.join(tag)
    }

    /// Write all four files for a container
    pub fn save(&self, tag: &str, data: &SnapshotData) -> Result<()> {
        let dir = self.container_dir(tag);
        fs::create_dir_all(&dir)?;

        write_atomic(
            &dir.join(SEARCH_FILE),
            &SearchFile {
                version: SNAPSHOT_VERSION,
                chunks: data.chunks.clone(),
            },
        )?;
        write_atomic(
            &dir.join(GRAPH_FILE),
            &GraphFile {
                version: SNAPSHOT_VERSION,
                nodes: data.graph.nodes.clone(),
                edges: data.graph.edges.clone(),
            },
        )?;
        write_atomic(
            &dir.join(FACTS_FILE),
            &FactsFile {
                version: SNAPSHOT_VERSION,
                facts: data.facts.clone(),
            },
        )?;
        write_atomic(
            &dir.join(PROFILE_FILE),
            &ProfileFile {
                version: SNAPSHOT_VERSION,
                facts: data.profile.clone(),
            },
        )?;

        Ok(())
    }

    /// Load whatever subset of files exists; missing or corrupt parts
    /// yield empty components.
    pub fn load(&self, tag: &str) -> SnapshotData {
        let dir = self.container_dir(tag);

        let search: Option<SearchFile> = read_tolerant(&dir.join(SEARCH_FILE));
        let graph: Option<GraphFile> = read_tolerant(&dir.join(GRAPH_FILE));
        let facts: Option<FactsFile> = read_tolerant(&dir.join(FACTS_FILE));
        let profile: Option<ProfileFile> = read_tolerant(&dir.join(PROFILE_FILE));

        SnapshotData {
            chunks: search.map(|f| f.chunks).unwrap_or_default(),
            graph: graph
                .map(|f| GraphSnapshot {
                    nodes: f.nodes,
                    edges: f.edges,
                })
                .unwrap_or_default(),
            facts: facts.map(|f| f.facts).unwrap_or_default(),
            profile: profile.map(|f| f.facts).unwrap_or_default(),
        }
    }

    pub fn exists(&self, tag: &str) -> bool {
        self.container_dir(tag).is_dir()
    }

    /// Remove a container's snapshot directory
    pub fn clear(&self, tag: &str) -> Result<()> {
        let dir = self.container_dir(tag);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Tags with a snapshot directory on disk
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return vec![];
        };
        let mut tags: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        tags.sort();
        tags
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_tolerant<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "snapshot file unreadable");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            let corrupt = RecallError::Corrupt(format!("{}: {}", path.display(), e));
            tracing::warn!(error = %corrupt, "treating snapshot file as missing");
            None
        }
    }
}
