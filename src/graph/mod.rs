//! Entity graph
//!
//! A labeled directed multigraph per container. Nodes are keyed by
//! normalized name; ingest merges duplicates. Retrieval finds seed
//! entities in the raw query and collects a bounded BFS neighborhood
//! over both edge directions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{EntityNode, RelationshipEdge};

/// Default BFS depth bound
pub const DEFAULT_MAX_HOPS: usize = 2;

/// Canonical node key: lowercase, whitespace runs become underscores
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Nodes and edges realized by a neighborhood traversal
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<RelationshipEdge>,
}

/// Labeled directed multigraph keyed by normalized entity name
#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: BTreeMap<String, EntityNode>,
    edges: Vec<RelationshipEdge>,
    edge_keys: HashSet<(String, String, String, String)>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or merge a node. Merging appends a novel summary, unions
    /// session ids, and keeps the first-seen type.
    pub fn add_entity(&mut self, name: &str, entity_type: &str, summary: &str, session_id: &str) {
        let key = normalize_name(name);
        if key.is_empty() {
            return;
        }

        match self.nodes.get_mut(&key) {
            Some(node) => {
                if !summary.is_empty() && !node.summary.contains(summary) {
                    if node.summary.is_empty() {
                        node.summary = summary.to_string();
                    } else {
                        node.summary.push_str("; ");
                        node.summary.push_str(summary);
                    }
                }
                node.session_ids.insert(session_id.to_string());
            }
            None => {
                let mut session_ids = std::collections::BTreeSet::new();
                session_ids.insert(session_id.to_string());
                self.nodes.insert(
                    key.clone(),
                    EntityNode {
                        name: key,
                        entity_type: entity_type.to_string(),
                        summary: summary.to_string(),
                        session_ids,
                    },
                );
            }
        }
    }

    /// Add an edge, deduplicated on `(source, relation, target, session)`.
    /// Missing endpoints are created as untyped nodes so every edge's
    /// endpoints exist.
    pub fn add_relationship(
        &mut self,
        source: &str,
        relation: &str,
        target: &str,
        date: Option<String>,
        session_id: &str,
    ) {
        let source = normalize_name(source);
        let target = normalize_name(target);
        if source.is_empty() || target.is_empty() || relation.is_empty() {
            return;
        }

        let key = (
            source.clone(),
            relation.to_string(),
            target.clone(),
            session_id.to_string(),
        );
        if !self.edge_keys.insert(key) {
            return;
        }

        for endpoint in [&source, &target] {
            if !self.nodes.contains_key(endpoint) {
                self.add_entity(endpoint, "unknown", "", session_id);
            }
        }

        self.edges.push(RelationshipEdge {
            source,
            target,
            relation: relation.to_string(),
            date,
            session_id: session_id.to_string(),
        });
    }

    /// Node names appearing in the query, as a whitespace token or as a
    /// substring of the underscore-joined token stream.
    pub fn entities_in_query(&self, query: &str) -> Vec<String> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return vec![];
        }
        let joined = tokens.join("_");

        self.nodes
            .keys()
            .filter(|name| tokens.iter().any(|t| t == *name) || joined.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// Breadth-first neighborhood of `seeds`, bounded by `max_hops`,
    /// following edges in both directions. Nodes are deduplicated by name
    /// and edges by `(source, relation, target)`.
    pub fn neighborhood(&self, seeds: &[String], max_hops: usize) -> GraphContext {
        let mut out_edges: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut in_edges: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, edge) in self.edges.iter().enumerate() {
            out_edges.entry(edge.source.as_str()).or_default().push(i);
            in_edges.entry(edge.target.as_str()).or_default().push(i);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut edge_seen: HashSet<(String, String, String)> = HashSet::new();
        let mut context = GraphContext::default();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seeds {
            let key = normalize_name(seed);
            if self.nodes.contains_key(&key) && visited.insert(key.clone()) {
                queue.push_back((key, 0));
            }
        }

        while let Some((name, depth)) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&name) {
                context.nodes.push(node.clone());
            }
            if depth >= max_hops {
                continue;
            }

            let outgoing = out_edges.get(name.as_str()).into_iter().flatten();
            let incoming = in_edges.get(name.as_str()).into_iter().flatten();
            for &edge_idx in outgoing.chain(incoming) {
                let edge = &self.edges[edge_idx];
                let edge_key = (
                    edge.source.clone(),
                    edge.relation.clone(),
                    edge.target.clone(),
                );
                if edge_seen.insert(edge_key) {
                    context.edges.push(edge.clone());
                }

                let neighbor = if edge.source == name {
                    &edge.target
                } else {
                    &edge.source
                };
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor.clone(), depth + 1));
                }
            }
        }

        context
    }

    pub fn get_node(&self, name: &str) -> Option<&EntityNode> {
        self.nodes.get(&normalize_name(name))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_data(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.edge_keys.clear();
    }

    /// Persisted form
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.clone(),
        }
    }

    /// Rebuild from the persisted form
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.nodes.insert(node.name.clone(), node);
        }
        for edge in snapshot.edges {
            let key = (
                edge.source.clone(),
                edge.relation.clone(),
                edge.target.clone(),
                edge.session_id.clone(),
            );
            if graph.edge_keys.insert(key) {
                for endpoint in [&edge.source, &edge.target] {
                    if !graph.nodes.contains_key(endpoint) {
                        graph.add_entity(endpoint, "unknown", "", &edge.session_id);
                    }
                }
                graph.edges.push(edge);
            }
        }
        graph
    }
}

/// Serialized graph contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<RelationshipEdge>,
}
