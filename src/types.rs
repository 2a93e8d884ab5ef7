//! Core types for Recall
//!
//! Conversation sessions come in over HTTP, are distilled into chunks,
//! atomic facts, graph records, and profile facts per container, and go
//! back out as a heterogeneous list of retrieved items tagged by `type`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single turn of a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// A multi-turn conversation session submitted for ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub turns: Vec<Turn>,
    /// Session date (YYYY-MM-DD)
    pub date: Option<String>,
}

impl Session {
    /// Render the session as plain text, one turn per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(&turn.role);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
        out
    }
}

/// An overlapping passage of distilled session text with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `<container>_<session>_<index>` - pure function of its coordinates
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub date: Option<String>,
    pub event_date: Option<String>,
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Deterministic chunk id
    pub fn make_id(container: &str, session_id: &str, index: usize) -> String {
        format!("{}_{}_{}", container, session_id, index)
    }
}

/// A short single-line extracted statement, searchable independently
/// of its parent chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicFact {
    pub id: String,
    pub content: String,
    pub session_id: String,
    pub fact_index: usize,
    pub date: Option<String>,
    pub event_date: Option<String>,
    pub embedding: Vec<f32>,
}

/// A node of the per-container entity graph, keyed by normalized name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
    pub session_ids: BTreeSet<String>,
}

/// A labeled directed edge between two entity nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub date: Option<String>,
    pub session_id: String,
}

/// A chunk scored by the hybrid engine
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Fused score (weighted dense + sparse, possibly boosted)
    pub score: f32,
    /// Raw cosine similarity before normalization
    pub vector_score: f32,
    /// Raw BM25 score before normalization
    pub bm25_score: f32,
    /// Stamped by the reranker when enabled
    pub rerank_score: Option<f32>,
}

/// A retrieval result record. Callers discriminate on the `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetrievedItem {
    Chunk {
        content: String,
        score: f32,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        date: Option<String>,
        #[serde(rename = "rerankScore", skip_serializing_if = "Option::is_none")]
        rerank_score: Option<f32>,
    },
    Entity {
        content: String,
        score: f32,
        name: String,
        #[serde(rename = "entityType")]
        entity_type: String,
        summary: String,
    },
    Relationship {
        content: String,
        score: f32,
        source: String,
        relation: String,
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        date: Option<String>,
    },
    Profile { content: String, score: f32 },
}

impl RetrievedItem {
    pub fn from_scored_chunk(sc: &ScoredChunk) -> Self {
        RetrievedItem::Chunk {
            content: sc.chunk.content.clone(),
            score: sc.score,
            session_id: sc.chunk.session_id.clone(),
            chunk_index: sc.chunk.chunk_index,
            date: sc.chunk.date.clone(),
            rerank_score: sc.rerank_score,
        }
    }

    pub fn from_entity(node: &EntityNode) -> Self {
        RetrievedItem::Entity {
            content: format!("{} ({}): {}", node.name, node.entity_type, node.summary),
            score: 1.0,
            name: node.name.clone(),
            entity_type: node.entity_type.clone(),
            summary: node.summary.clone(),
        }
    }

    pub fn from_relationship(edge: &RelationshipEdge) -> Self {
        let content = match &edge.date {
            Some(d) => format!("{} {} {} ({})", edge.source, edge.relation, edge.target, d),
            None => format!("{} {} {}", edge.source, edge.relation, edge.target),
        };
        RetrievedItem::Relationship {
            content,
            score: 1.0,
            source: edge.source.clone(),
            relation: edge.relation.clone(),
            target: edge.target.clone(),
            date: edge.date.clone(),
        }
    }
}

// =============================================================================
// HTTP wire types
// =============================================================================

/// Body of `POST /ingest`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub container_tag: String,
    pub session_id: String,
    pub messages: Vec<Turn>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Body of `POST /search`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub container_tag: String,
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Body of `POST /store`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    pub container_tag: String,
    pub text: String,
}

/// Response of `POST /ingest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub document_ids: Vec<String>,
}

/// Response of `POST /search`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RetrievedItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        assert_eq!(Chunk::make_id("alice", "s1", 0), "alice_s1_0");
        assert_eq!(
            Chunk::make_id("alice", "s1", 3),
            Chunk::make_id("alice", "s1", 3)
        );
    }

    #[test]
    fn test_retrieved_item_type_tag() {
        let item = RetrievedItem::Profile {
            content: "<user_profile>\n- likes tea\n</user_profile>".to_string(),
            score: 1.0,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "profile");

        let edge = RelationshipEdge {
            source: "alice".into(),
            target: "google".into(),
            relation: "works_at".into(),
            date: None,
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(RetrievedItem::from_relationship(&edge)).unwrap();
        assert_eq!(json["type"], "relationship");
        assert_eq!(json["content"], "alice works_at google");
    }

    #[test]
    fn test_session_render() {
        let session = Session {
            session_id: "s1".into(),
            turns: vec![
                Turn { role: "user".into(), content: "hello".into() },
                Turn { role: "assistant".into(), content: "hi".into() },
            ],
            date: None,
        };
        assert_eq!(session.render(), "user: hello\nassistant: hi\n");
    }
}
