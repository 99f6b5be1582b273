//! Snapshot storage contract.
//!
//! A snapshot store is the save point of a matching run: it receives the
//! current graph together with the full provenance log and must either
//! persist both or leave the previously saved state untouched.

use crate::error::PersistenceError;
use crate::graph::GraphStore;
use crate::provenance::ProvenanceLog;

/// A graph and its provenance log, as saved together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// The deduplicated graph.
    pub graph: GraphStore,
    /// Every merge and deletion that produced `graph`.
    pub provenance: ProvenanceLog,
}

/// Storage backend for matcher save points.
///
/// # Safety Considerations
/// - `save` is all-or-nothing: on error the previous snapshot stays readable
/// - Implementations must be usable behind a shared reference
pub trait SnapshotStore: Send + Sync {
    /// Persist the graph and the provenance log as one unit.
    fn save(&self, graph: &GraphStore, provenance: &ProvenanceLog) -> Result<(), PersistenceError>;

    /// Load the last saved snapshot, if any.
    fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;
}
