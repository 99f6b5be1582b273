//! Snapshot storage for matcher save points.
//!
//! [`SnapshotStore`] is the seam between the matcher and durable state.
//! [`InMemorySnapshotStore`] serves tests and dry runs; the
//! [`persistent`] module writes locked, checksummed files.

mod memory;
pub mod persistent;
mod traits;

pub use memory::InMemorySnapshotStore;
pub use persistent::{FileSnapshotStore, PersistentConfig};
pub use traits::{Snapshot, SnapshotStore};
