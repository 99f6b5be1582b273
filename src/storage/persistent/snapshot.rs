//! Directory-backed snapshot store.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::codec;
use super::file_lock::FileLock;
use super::{PersistentConfig, BACKUP_SUFFIX};
use crate::error::PersistenceError;
use crate::graph::{GraphImage, GraphStore};
use crate::provenance::ProvenanceLog;
use crate::storage::traits::{Snapshot, SnapshotStore};

const GRAPH: &str = "graph";
const PROVENANCE: &str = "provenance";
const TEMP_MARKER: &str = ".tmp.";

/// Writes one file atomically: temp file, flush, fsync, rename.
///
/// Dropping a writer that was not committed removes its temp file.
struct AtomicFile {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    fn create(final_path: PathBuf) -> Result<Self, PersistenceError> {
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path =
            final_path.with_file_name(format!("{file_name}{TEMP_MARKER}{}", uuid::Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| PersistenceError::io(&temp_path, e))?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn temp_path(&self) -> &Path {
        self.temp_path.as_deref().unwrap_or(&self.final_path)
    }

    /// Write and flush the content; fsync when `sync` is set.
    fn write(&mut self, bytes: &[u8], sync: bool) -> Result<(), PersistenceError> {
        let path = self.temp_path().to_path_buf();
        let writer = self.writer.as_mut().ok_or_else(|| PersistenceError::Backend {
            message: "writer already consumed".to_string(),
        })?;
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| PersistenceError::io(&path, e))?;
        if sync {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| PersistenceError::io(&path, e))?;
        }
        Ok(())
    }

    /// Rename the temp file over the final path.
    fn commit(mut self) -> Result<(), PersistenceError> {
        self.writer.take();
        let temp_path = self.temp_path.take().ok_or_else(|| PersistenceError::Backend {
            message: "temp path already consumed".to_string(),
        })?;
        if let Err(e) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(PersistenceError::io(&self.final_path, e));
        }
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        // Best-effort cleanup of temp file if not committed
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

/// Saves snapshots into a locked directory.
///
/// Both files of a save carry the same generation id. The provenance file is
/// renamed into place first and the graph file last, so the only torn state
/// is a new provenance log next to the old graph. Before that rename the old
/// log is kept as `<provenance_file>.prev`: a failed graph rename restores it,
/// and a load that finds mismatching generations falls back to it. Without a
/// matching backup the directory is reported as corrupted instead of pairing
/// a graph with the wrong provenance.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    config: PersistentConfig,
    _lock: FileLock,
}

impl FileSnapshotStore {
    /// Open (creating if needed) and lock a snapshot directory.
    ///
    /// Stale temp files from interrupted saves are removed.
    ///
    /// # Errors
    /// - `InvalidConfig` if `config` does not validate
    /// - `Locked` if another process holds the directory
    /// - `Io` if the directory cannot be created or scanned
    pub fn open(dir: impl AsRef<Path>, config: PersistentConfig) -> Result<Self, PersistenceError> {
        let config = config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        let lock = FileLock::acquire(&dir)?;

        for entry in fs::read_dir(&dir).map_err(|e| PersistenceError::io(&dir, e))? {
            let path = entry.map_err(|e| PersistenceError::io(&dir, e))?.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(TEMP_MARKER));
            if stale {
                warn!(path = %path.display(), "removing stale temp file");
                let _ = fs::remove_file(&path);
            }
        }

        Ok(Self {
            dir,
            config,
            _lock: lock,
        })
    }

    /// Directory holding the snapshot files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the serialized graph.
    #[must_use]
    pub fn graph_path(&self) -> PathBuf {
        self.dir.join(&self.config.graph_file)
    }

    /// Path of the serialized provenance log.
    #[must_use]
    pub fn provenance_path(&self) -> PathBuf {
        self.dir.join(&self.config.provenance_file)
    }

    /// Path of the provenance log kept while a save is in flight.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{BACKUP_SUFFIX}", self.config.provenance_file))
    }

    /// Keep the committed provenance log reachable under the backup path.
    ///
    /// Returns false when there is no committed log to keep.
    fn back_up_provenance(&self) -> Result<bool, PersistenceError> {
        let current = self.provenance_path();
        let is_file = fs::symlink_metadata(&current).is_ok_and(|m| m.is_file());
        if !is_file {
            return Ok(false);
        }
        let backup = self.backup_path();
        match fs::remove_file(&backup) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistenceError::io(&backup, e)),
        }
        fs::hard_link(&current, &backup)
            .or_else(|_| fs::copy(&current, &backup).map(|_| ()))
            .map_err(|e| PersistenceError::io(&backup, e))?;
        if self.config.sync_on_write {
            self.sync_dir()?;
        }
        Ok(true)
    }

    /// Undo a committed provenance rename after the graph rename failed.
    fn restore_provenance(&self, backed_up: bool) {
        let current = self.provenance_path();
        let restored = if backed_up {
            fs::rename(self.backup_path(), &current)
        } else {
            fs::remove_file(&current)
        };
        if let Err(e) = restored {
            warn!(
                path = %current.display(),
                error = %e,
                "could not restore previous provenance log"
            );
        }
    }

    fn discard_backup(&self) {
        let backup = self.backup_path();
        if let Err(e) = fs::remove_file(&backup) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %backup.display(), error = %e, "could not remove provenance backup");
            }
        }
    }

    /// Decode the backup log if it belongs to `generation`.
    fn backup_for(&self, generation: uuid::Uuid) -> Option<ProvenanceLog> {
        let bytes = Self::read_file(&self.backup_path()).ok()??;
        let (header, log): (_, ProvenanceLog) = codec::decode_file(PROVENANCE, &bytes).ok()?;
        (header.generation == generation).then_some(log)
    }

    fn read_file(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), PersistenceError> {
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| PersistenceError::io(&self.dir, e))
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, graph: &GraphStore, provenance: &ProvenanceLog) -> Result<(), PersistenceError> {
        let generation = uuid::Uuid::new_v4();
        let graph_bytes = codec::encode_file(GRAPH, generation, &graph.to_image())?;
        let provenance_bytes = codec::encode_file(PROVENANCE, generation, provenance)?;

        // Both temp files are complete and durable before either is renamed.
        let mut graph_file = AtomicFile::create(self.graph_path())?;
        graph_file.write(&graph_bytes, self.config.sync_on_write)?;
        let mut provenance_file = AtomicFile::create(self.provenance_path())?;
        provenance_file.write(&provenance_bytes, self.config.sync_on_write)?;

        let backed_up = self.back_up_provenance()?;
        if let Err(e) = provenance_file.commit() {
            if backed_up {
                self.discard_backup();
            }
            return Err(e);
        }
        if let Err(e) = graph_file.commit() {
            self.restore_provenance(backed_up);
            return Err(e);
        }
        if self.config.sync_on_write {
            self.sync_dir()?;
        }
        self.discard_backup();

        info!(
            dir = %self.dir.display(),
            %generation,
            graph_bytes = graph_bytes.len(),
            provenance_entries = provenance.len(),
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let graph_bytes = Self::read_file(&self.graph_path())?;
        let provenance_bytes = Self::read_file(&self.provenance_path())?;

        let (graph_bytes, provenance_bytes) = match (graph_bytes, provenance_bytes) {
            (None, None) => return Ok(None),
            (Some(g), Some(p)) => (g, p),
            (Some(_), None) => {
                return Err(PersistenceError::Corrupted {
                    what: PROVENANCE,
                    message: "provenance file missing next to graph file".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(PersistenceError::Corrupted {
                    what: GRAPH,
                    message: "graph file missing next to provenance file".to_string(),
                })
            }
        };

        let (graph_header, image): (_, GraphImage) = codec::decode_file(GRAPH, &graph_bytes)?;
        let (provenance_header, mut provenance): (_, ProvenanceLog) =
            codec::decode_file(PROVENANCE, &provenance_bytes)?;
        if graph_header.generation != provenance_header.generation {
            let Some(previous) = self.backup_for(graph_header.generation) else {
                return Err(PersistenceError::Corrupted {
                    what: PROVENANCE,
                    message: format!(
                        "graph generation {} does not match provenance generation {}",
                        graph_header.generation, provenance_header.generation
                    ),
                });
            };
            warn!(
                generation = %graph_header.generation,
                "interrupted save detected, loading previous provenance log"
            );
            provenance = previous;
        }

        debug!(generation = %graph_header.generation, "snapshot loaded");
        Ok(Some(Snapshot {
            graph: GraphStore::from_image(image),
            provenance,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BrType;
    use crate::identifier::Scheme;
    use tempfile::tempdir;

    fn small_graph() -> GraphStore {
        let mut graph = GraphStore::new();
        let br = graph.add_resource(BrType::JournalArticle, Some("Paper"));
        graph.add_identifier_to(br, Scheme::Doi, "10.1/x").unwrap();
        graph
    }

    #[test]
    fn test_atomic_file_drop_removes_temp() {
        let dir = tempdir().unwrap();
        let temp;
        {
            let mut file = AtomicFile::create(dir.path().join("out.json")).unwrap();
            file.write(b"partial", false).unwrap();
            temp = file.temp_path().to_path_buf();
            assert!(temp.exists());
        }
        assert!(!temp.exists());
        assert!(!dir.path().join("out.json").exists());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path(), PersistentConfig::default()).unwrap();
        assert!(store.load().unwrap().is_none());

        let graph = small_graph();
        store.save(&graph, &ProvenanceLog::new()).unwrap();
        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.graph, graph);
        assert!(snapshot.provenance.is_empty());
        assert!(store.graph_path().ends_with("matched.json"));
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("matched.json.tmp.deadbeef");
        fs::write(&stale, b"junk").unwrap();

        let _store = FileSnapshotStore::open(dir.path(), PersistentConfig::default()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_failed_graph_rename_restores_previous_log() {
        let dir = tempdir().unwrap();
        {
            let store = FileSnapshotStore::open(dir.path(), PersistentConfig::default()).unwrap();
            store.save(&small_graph(), &ProvenanceLog::new()).unwrap();
        }
        let previous = fs::read(dir.path().join("provenance.json")).unwrap();

        fs::create_dir_all(dir.path().join("blocked.json").join("inner")).unwrap();
        {
            let config = PersistentConfig {
                graph_file: "blocked.json".to_string(),
                ..PersistentConfig::default()
            };
            let store = FileSnapshotStore::open(dir.path(), config).unwrap();
            let err = store.save(&GraphStore::new(), &ProvenanceLog::new()).unwrap_err();
            assert!(matches!(err, PersistenceError::Io { .. }), "got {err}");
            assert!(!store.backup_path().exists());
        }

        assert_eq!(fs::read(dir.path().join("provenance.json")).unwrap(), previous);
        let store = FileSnapshotStore::open(dir.path(), PersistentConfig::default()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().graph, small_graph());
    }

    #[test]
    fn test_load_recovers_save_interrupted_between_renames() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path(), PersistentConfig::default()).unwrap();
        store.save(&small_graph(), &ProvenanceLog::new()).unwrap();
        let old_graph = fs::read(store.graph_path()).unwrap();
        let old_log = fs::read(store.provenance_path()).unwrap();

        store.save(&GraphStore::new(), &ProvenanceLog::new()).unwrap();
        assert!(!store.backup_path().exists());

        // New log renamed into place, old graph and backup still on disk.
        fs::write(store.graph_path(), old_graph).unwrap();
        fs::write(store.backup_path(), old_log).unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.graph, small_graph());

        fs::remove_file(store.backup_path()).unwrap();
        assert!(matches!(store.load(), Err(PersistenceError::Corrupted { .. })));
    }

    #[test]
    fn test_mismatched_generations_are_rejected() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        {
            let a = FileSnapshotStore::open(first.path(), PersistentConfig::default()).unwrap();
            a.save(&small_graph(), &ProvenanceLog::new()).unwrap();
            let b = FileSnapshotStore::open(second.path(), PersistentConfig::default()).unwrap();
            b.save(&GraphStore::new(), &ProvenanceLog::new()).unwrap();
        }
        fs::copy(
            second.path().join("provenance.json"),
            first.path().join("provenance.json"),
        )
        .unwrap();

        let store = FileSnapshotStore::open(first.path(), PersistentConfig::default()).unwrap();
        assert!(matches!(store.load(), Err(PersistenceError::Corrupted { .. })));
    }
}
