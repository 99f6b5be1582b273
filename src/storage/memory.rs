//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`SnapshotStore`]. It is intended for embedded usage, tests, and dry runs.
//! Snapshots go through the same codec as files so that a value saved here
//! round-trips exactly like one saved to disk.

use std::sync::RwLock;

use tracing::debug;

use crate::error::PersistenceError;
use crate::graph::{GraphImage, GraphStore};
use crate::provenance::ProvenanceLog;
use crate::storage::persistent::{decode_file, encode_file};
use crate::storage::traits::{Snapshot, SnapshotStore};

fn lock_err(context: &'static str) -> PersistenceError {
    PersistenceError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

#[derive(Debug, Clone)]
struct Encoded {
    graph: Vec<u8>,
    provenance: Vec<u8>,
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    state: RwLock<Option<Encoded>>,
    saves: RwLock<u64>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    ///
    /// # Errors
    /// - `Backend` if the lock is poisoned
    pub fn save_count(&self) -> Result<u64, PersistenceError> {
        self.saves.read().map(|n| *n).map_err(|_| lock_err("saves"))
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, graph: &GraphStore, provenance: &ProvenanceLog) -> Result<(), PersistenceError> {
        let generation = uuid::Uuid::new_v4();
        let encoded = Encoded {
            graph: encode_file("graph", generation, &graph.to_image())?,
            provenance: encode_file("provenance", generation, provenance)?,
        };

        let mut state = self.state.write().map_err(|_| lock_err("snapshot"))?;
        *state = Some(encoded);
        drop(state);

        let mut saves = self.saves.write().map_err(|_| lock_err("saves"))?;
        *saves += 1;
        debug!(%generation, "snapshot kept in memory");
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        let Some(encoded) = state.as_ref() else {
            return Ok(None);
        };
        let (_, image): (_, GraphImage) = decode_file("graph", &encoded.graph)?;
        let (_, provenance): (_, ProvenanceLog) = decode_file("provenance", &encoded.provenance)?;
        Ok(Some(Snapshot {
            graph: GraphStore::from_image(image),
            provenance,
        }))
    }
}
