//! Relational backend
//!
//! When `DATABASE_URL` is set, tag-scoped SQLite tables replace the
//! in-memory indices and snapshots are skipped. Embeddings are stored as
//! f32 little-endian blobs and scored in Rust, so the same fusion code
//! serves both backends.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};

use crate::error::{RecallError, Result};
use crate::graph::GraphSnapshot;
use crate::types::{AtomicFact, Chunk, EntityNode, RelationshipEdge};

/// SQLite store shared by all containers
pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Open the database at `url` (a filesystem path or `sqlite://` URL)
    pub fn open(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                container TEXT NOT NULL,
                session_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                date TEXT,
                event_date TEXT,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_container ON chunks(container);
            CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks(container, session_id);

            CREATE TABLE IF NOT EXISTS facts (
                id TEXT PRIMARY KEY,
                container TEXT NOT NULL,
                session_id TEXT NOT NULL,
                fact_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                date TEXT,
                event_date TEXT,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_facts_container ON facts(container);

            CREATE TABLE IF NOT EXISTS entities (
                container TEXT NOT NULL,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                summary TEXT NOT NULL,
                session_ids TEXT NOT NULL,
                PRIMARY KEY (container, name)
            );

            CREATE TABLE IF NOT EXISTS relationships (
                container TEXT NOT NULL,
                source TEXT NOT NULL,
                relation TEXT NOT NULL,
                target TEXT NOT NULL,
                session_id TEXT NOT NULL,
                date TEXT,
                UNIQUE (container, source, relation, target, session_id)
            );

            CREATE TABLE IF NOT EXISTS profiles (
                container TEXT PRIMARY KEY,
                facts TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    /// Insert chunks, ignoring ids already present
    pub fn add_chunks(&self, container: &str, chunks: &[Chunk]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO chunks
                 (id, container, session_id, chunk_index, content, date, event_date, embedding, dimensions)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for chunk in chunks {
                added += stmt.execute(params![
                    chunk.id,
                    container,
                    chunk.session_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.date,
                    chunk.event_date,
                    encode_embedding(&chunk.embedding),
                    chunk.embedding.len() as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// All chunks of a container
    pub fn load_chunks(&self, container: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, chunk_index, content, date, event_date, embedding, dimensions
             FROM chunks WHERE container = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![container], chunk_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Chunks of one session within a container
    pub fn chunks_by_session(&self, container: &str, session_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, chunk_index, content, date, event_date, embedding, dimensions
             FROM chunks WHERE container = ? AND session_id = ? ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![container, session_id], chunk_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn has_chunks(&self, container: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE container = ?",
            params![container],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // =========================================================================
    // Facts
    // =========================================================================

    pub fn add_facts(&self, container: &str, facts: &[AtomicFact]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO facts
                 (id, container, session_id, fact_index, content, date, event_date, embedding, dimensions)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for fact in facts {
                added += stmt.execute(params![
                    fact.id,
                    container,
                    fact.session_id,
                    fact.fact_index as i64,
                    fact.content,
                    fact.date,
                    fact.event_date,
                    encode_embedding(&fact.embedding),
                    fact.embedding.len() as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    pub fn load_facts(&self, container: &str) -> Result<Vec<AtomicFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, fact_index, content, date, event_date, embedding, dimensions
             FROM facts WHERE container = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![container], |row| {
            let bytes: Vec<u8> = row.get(6)?;
            Ok(AtomicFact {
                id: row.get(0)?,
                session_id: row.get(1)?,
                fact_index: row.get::<_, i64>(2)? as usize,
                content: row.get(3)?,
                date: row.get(4)?,
                event_date: row.get(5)?,
                embedding: decode_embedding(&bytes),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // =========================================================================
    // Graph
    // =========================================================================

    /// Create or merge an entity row (same rule as the in-memory graph)
    pub fn upsert_entity(
        &self,
        container: &str,
        name: &str,
        entity_type: &str,
        summary: &str,
        session_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();

        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT summary, session_ids FROM entities WHERE container = ? AND name = ?",
                params![container, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some((mut current_summary, session_json)) => {
                if !summary.is_empty() && !current_summary.contains(summary) {
                    if current_summary.is_empty() {
                        current_summary = summary.to_string();
                    } else {
                        current_summary.push_str("; ");
                        current_summary.push_str(summary);
                    }
                }
                let mut sessions: Vec<String> =
                    serde_json::from_str(&session_json).unwrap_or_default();
                if !sessions.iter().any(|s| s == session_id) {
                    sessions.push(session_id.to_string());
                }
                conn.execute(
                    "UPDATE entities SET summary = ?, session_ids = ? WHERE container = ? AND name = ?",
                    params![
                        current_summary,
                        serde_json::to_string(&sessions)?,
                        container,
                        name
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO entities (container, name, entity_type, summary, session_ids)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        container,
                        name,
                        entity_type,
                        summary,
                        serde_json::to_string(&[session_id])?
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn add_relationship(&self, container: &str, edge: &RelationshipEdge) -> Result<()> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relationships
             (container, source, relation, target, session_id, date)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                container,
                edge.source,
                edge.relation,
                edge.target,
                edge.session_id,
                edge.date
            ],
        )?;
        if inserted == 0 {
            return Ok(());
        }

        // Missing endpoints become untyped rows so every edge's endpoints
        // exist in the stored table, same as the in-memory graph
        for endpoint in [&edge.source, &edge.target] {
            conn.execute(
                "INSERT OR IGNORE INTO entities
                 (container, name, entity_type, summary, session_ids)
                 VALUES (?, ?, 'unknown', '', ?)",
                params![
                    container,
                    endpoint,
                    serde_json::to_string(&[&edge.session_id])?
                ],
            )?;
        }
        Ok(())
    }

    /// Load a container's whole graph; small enough for in-memory BFS
    pub fn load_graph(&self, container: &str) -> Result<GraphSnapshot> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT name, entity_type, summary, session_ids FROM entities WHERE container = ? ORDER BY name",
        )?;
        let nodes = stmt
            .query_map(params![container], |row| {
                let session_json: String = row.get(3)?;
                let sessions: Vec<String> =
                    serde_json::from_str(&session_json).unwrap_or_default();
                Ok(EntityNode {
                    name: row.get(0)?,
                    entity_type: row.get(1)?,
                    summary: row.get(2)?,
                    session_ids: sessions.into_iter().collect(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT source, relation, target, session_id, date FROM relationships
             WHERE container = ? ORDER BY source, relation, target",
        )?;
        let edges = stmt
            .query_map(params![container], |row| {
                Ok(RelationshipEdge {
                    source: row.get(0)?,
                    relation: row.get(1)?,
                    target: row.get(2)?,
                    session_id: row.get(3)?,
                    date: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(GraphSnapshot { nodes, edges })
    }

    // =========================================================================
    // Profile
    // =========================================================================

    pub fn load_profile(&self, container: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let row: Option<String> = conn
            .query_row(
                "SELECT facts FROM profiles WHERE container = ?",
                params![container],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(row
            .map(|json| serde_json::from_str(&json).unwrap_or_default())
            .unwrap_or_default())
    }

    pub fn save_profile(&self, container: &str, facts: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO profiles (container, facts) VALUES (?, ?)
             ON CONFLICT(container) DO UPDATE SET facts = excluded.facts",
            params![container, serde_json::to_string(facts)?],
        )?;
        Ok(())
    }

    // =========================================================================
    // Container lifecycle
    // =========================================================================

    /// Delete every row belonging to a container
    pub fn clear_container(&self, container: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for table in ["chunks", "facts", "entities", "relationships", "profiles"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE container = ?", table),
                params![container],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Distinct tags across all tables
    pub fn list_containers(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT container FROM chunks
             UNION SELECT DISTINCT container FROM entities
             UNION SELECT DISTINCT container FROM profiles
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Session ids present in a container (for extractor cache invalidation)
    pub fn session_ids(&self, container: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM chunks WHERE container = ?")?;
        let rows = stmt.query_map(params![container], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let bytes: Vec<u8> = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        session_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        content: row.get(3)?,
        date: row.get(4)?,
        event_date: row.get(5)?,
        embedding: decode_embedding(&bytes),
    })
}

/// f32 little-endian byte packing
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RelationalStore {
        RelationalStore::open(":memory:").unwrap()
    }

    fn chunk(id: &str, session: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            session_id: session.to_string(),
            chunk_index: 0,
            date: None,
            event_date: None,
            embedding: vec![0.25, -1.5, 3.0],
        }
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let original = vec![0.1f32, -2.5, 1e-7, 42.0];
        let decoded = decode_embedding(&encode_embedding(&original));
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_chunk_round_trip_and_idempotence() {
        let store = store();
        let chunks = vec![chunk("t_s1_0", "s1", "hello world")];
        assert_eq!(store.add_chunks("t", &chunks).unwrap(), 1);
        assert_eq!(store.add_chunks("t", &chunks).unwrap(), 0);

        let loaded = store.load_chunks("t").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].embedding, vec![0.25, -1.5, 3.0]);
        assert!(store.has_chunks("t").unwrap());
        assert!(!store.has_chunks("other").unwrap());
    }

    #[test]
    fn test_entity_merge() {
        let store = store();
        store.upsert_entity("t", "alice", "person", "an engineer", "s1").unwrap();
        store.upsert_entity("t", "alice", "robot", "likes hiking", "s2").unwrap();

        let graph = store.load_graph("t").unwrap();
        assert_eq!(graph.nodes.len(), 1);
        let node = &graph.nodes[0];
        assert_eq!(node.entity_type, "person");
        assert!(node.summary.contains("an engineer"));
        assert!(node.summary.contains("likes hiking"));
        assert_eq!(node.session_ids.len(), 2);
    }

    #[test]
    fn test_relationship_dedup() {
        let store = store();
        let edge = RelationshipEdge {
            source: "alice".into(),
            relation: "works_at".into(),
            target: "google".into(),
            date: None,
            session_id: "s1".into(),
        };
        store.add_relationship("t", &edge).unwrap();
        store.add_relationship("t", &edge).unwrap();
        assert_eq!(store.load_graph("t").unwrap().edges.len(), 1);
    }

    #[test]
    fn test_edge_endpoints_autocreated() {
        let store = store();
        store.upsert_entity("t", "alice", "person", "an engineer", "s1").unwrap();
        let edge = RelationshipEdge {
            source: "alice".into(),
            relation: "works_at".into(),
            target: "google".into(),
            date: None,
            session_id: "s1".into(),
        };
        store.add_relationship("t", &edge).unwrap();

        let graph = store.load_graph("t").unwrap();
        assert_eq!(graph.nodes.len(), 2);
        let google = graph.nodes.iter().find(|n| n.name == "google").unwrap();
        assert_eq!(google.entity_type, "unknown");
        assert!(google.summary.is_empty());
        assert!(google.session_ids.contains("s1"));

        // The stub row never clobbers an entity the extractor described
        let alice = graph.nodes.iter().find(|n| n.name == "alice").unwrap();
        assert_eq!(alice.entity_type, "person");
    }

    #[test]
    fn test_profile_round_trip() {
        let store = store();
        assert!(store.load_profile("t").unwrap().is_empty());
        store.save_profile("t", &["Likes tea".to_string()]).unwrap();
        store
            .save_profile("t", &["Likes tea".to_string(), "Has a dog".to_string()])
            .unwrap();
        assert_eq!(store.load_profile("t").unwrap().len(), 2);
    }

    #[test]
    fn test_clear_container_scoped() {
        let store = store();
        store.add_chunks("a", &[chunk("a_s1_0", "s1", "x")]).unwrap();
        store.add_chunks("b", &[chunk("b_s1_0", "s1", "y")]).unwrap();

        store.clear_container("a").unwrap();
        assert!(!store.has_chunks("a").unwrap());
        assert!(store.has_chunks("b").unwrap());
        assert_eq!(store.list_containers().unwrap(), vec!["b".to_string()]);
    }
}
