//! Persistence for Recall
//!
//! Two backends implement the same narrow set of operations: the default
//! in-memory indices with per-container JSON snapshots, and an optional
//! relational store enabled by `DATABASE_URL`. The query and ingest
//! pipelines branch once on which is active.

mod relational;
mod snapshot;

pub use relational::RelationalStore;
pub use snapshot::{SnapshotData, SnapshotStore};

/// The active persistence backend
pub enum Backend {
    /// In-memory indices, snapshotted to disk after each ingest
    Memory(SnapshotStore),
    /// Tag-scoped relational tables; snapshots are skipped
    Relational(RelationalStore),
}

impl Backend {
    pub fn is_relational(&self) -> bool {
        matches!(self, Backend::Relational(_))
    }
}
