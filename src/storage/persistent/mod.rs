//! Persistent snapshot storage.
//!
//! This module provides durable, crash-safe save points with:
//! - File locking for single-process access to the output directory
//! - CRC32 checksums for corruption detection
//! - Write-to-temp, fsync, rename for both output files
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   .lock             exclusive lock, held while the store is open
//!   matched.json      graph image      [magic][frame header][frame body]
//!   provenance.json   provenance log   [magic][frame header][frame body]
//!   provenance.json.prev
//!                     previous log, present only while a save is in flight
//! ```

mod codec;
mod file_lock;
mod snapshot;

pub(crate) use codec::{decode_file, encode_file};
pub use file_lock::{FileLock, LOCK_FILE_NAME};
pub use snapshot::FileSnapshotStore;

use crate::error::PersistenceError;

/// Suffix of the provenance backup kept during a save.
pub(crate) const BACKUP_SUFFIX: &str = ".prev";

/// Configuration for persistent snapshot storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// File name of the serialized graph inside the snapshot directory.
    pub graph_file: String,
    /// File name of the serialized provenance log.
    pub provenance_file: String,
    /// Whether to fsync files and directory on every save (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            graph_file: "matched.json".to_string(),
            provenance_file: "provenance.json".to_string(),
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Check that both file names are usable and distinct.
    ///
    /// # Errors
    /// - `InvalidConfig` for empty names, names with path separators, names
    ///   clashing with the lock file, or identical names
    pub fn validate(self) -> Result<Self, PersistenceError> {
        for (field, name) in [
            ("graph_file", &self.graph_file),
            ("provenance_file", &self.provenance_file),
        ] {
            if name.trim().is_empty() {
                return Err(PersistenceError::InvalidConfig {
                    reason: format!("{field} must not be empty"),
                });
            }
            if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
                return Err(PersistenceError::InvalidConfig {
                    reason: format!("{field} must be a plain file name (got {name:?})"),
                });
            }
            if name == LOCK_FILE_NAME {
                return Err(PersistenceError::InvalidConfig {
                    reason: format!("{field} clashes with the lock file"),
                });
            }
        }
        if self.graph_file == format!("{}{BACKUP_SUFFIX}", self.provenance_file) {
            return Err(PersistenceError::InvalidConfig {
                reason: "graph_file clashes with the provenance backup".to_string(),
            });
        }
        if self.graph_file == self.provenance_file {
            return Err(PersistenceError::InvalidConfig {
                reason: "graph_file and provenance_file must differ".to_string(),
            });
        }
        Ok(self)
    }
}

/// Open a locked snapshot directory with the given (or default) configuration.
///
/// # Example
/// ```rust,no_run
/// use bibmatch::storage::persistent::open_snapshot_dir;
///
/// let store = open_snapshot_dir("./out", None)?;
/// # Ok::<(), bibmatch::PersistenceError>(())
/// ```
pub fn open_snapshot_dir(
    path: impl AsRef<std::path::Path>,
    config: Option<PersistentConfig>,
) -> Result<FileSnapshotStore, PersistenceError> {
    FileSnapshotStore::open(path, config.unwrap_or_default())
}
