//! Persistence Layer.
//!
//! One pretty-printed JSON document per store:
//!
//! ```json
//! { "format_version": 1, "dimension": 3, "next_id": 7, "entries": [ ... ] }
//! ```
//!
//! Saves never modify the committed file in place. The document is written
//! to a [`NamedTempFile`] in the destination directory, fsynced, and renamed
//! over the target, so a crash mid-write leaves the previous state intact.
//! The temporary file is deleted when it drops on any failure path.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ara_types::MemoryError;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::entry::MemoryEntry;
use crate::store::MemoryRecordStore;

/// Version tag written into every snapshot.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    dimension: Option<usize>,
    next_id: u64,
    entries: Vec<&'a MemoryEntry>,
}

#[derive(Deserialize)]
struct Snapshot {
    dimension: Option<usize>,
    next_id: u64,
    entries: Vec<MemoryEntry>,
}

/// The durable home of one store.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialise `store` into snapshot bytes.
    ///
    /// Split from [`write_bytes`][Self::write_bytes] so the engine can encode
    /// under its read lock and do the file I/O after releasing it.
    pub fn encode(store: &MemoryRecordStore) -> Result<Vec<u8>, MemoryError> {
        let snapshot = SnapshotRef {
            format_version: FORMAT_VERSION,
            dimension: store.dimension(),
            next_id: store.next_id(),
            entries: store.all().collect(),
        };
        serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| MemoryError::Internal(format!("failed to encode snapshot: {e}")))
    }

    /// Atomically replace the file's contents with `bytes`.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), MemoryError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        // NamedTempFile is created owner-only (0o600) on Unix.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        #[cfg(unix)]
        fs::File::open(&dir)?.sync_all()?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    pub fn save(&self, store: &MemoryRecordStore) -> Result<(), MemoryError> {
        let bytes = Self::encode(store)?;
        self.write_bytes(&bytes)
    }

    /// Load the store, or an empty one if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// [`MemoryError::CorruptState`] if the file is not a snapshot this
    /// version understands or violates a store invariant; whether to start
    /// fresh instead is the caller's decision.
    pub fn load(&self) -> Result<MemoryRecordStore, MemoryError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot found, starting empty");
                return Ok(MemoryRecordStore::new());
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| MemoryError::CorruptState(format!("snapshot is not valid JSON: {e}")))?;
        let version = match &value {
            serde_json::Value::Object(map) => map.get("format_version").and_then(|v| v.as_u64()),
            serde_json::Value::Array(_) => {
                return Err(MemoryError::CorruptState(
                    "file is a conversation log, not a snapshot; import it as a transcript".into(),
                ));
            }
            _ => None,
        };
        match version {
            Some(v) if v == u64::from(FORMAT_VERSION) => {}
            Some(v) => {
                return Err(MemoryError::CorruptState(format!(
                    "unsupported snapshot format version {v}"
                )));
            }
            None => {
                return Err(MemoryError::CorruptState(
                    "snapshot has no format_version".into(),
                ));
            }
        }

        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| MemoryError::CorruptState(format!("malformed snapshot: {e}")))?;
        let store =
            MemoryRecordStore::from_parts(snapshot.dimension, snapshot.next_id, snapshot.entries)?;
        info!(path = %self.path.display(), entries = store.len(), "snapshot loaded");
        Ok(store)
    }

    /// Move a corrupt file aside as `<name>.corrupt` and return its new path.
    pub fn quarantine(&self) -> Result<PathBuf, MemoryError> {
        let mut name = self.path.clone().into_os_string();
        name.push(".corrupt");
        let target = PathBuf::from(name);
        fs::rename(&self.path, &target)?;
        warn!(from = %self.path.display(), to = %target.display(), "corrupt snapshot moved aside");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ara_types::{Metadata, Role};
    use chrono::Utc;

    fn sample_store() -> MemoryRecordStore {
        let mut store = MemoryRecordStore::new();
        let now = Utc::now();
        let id = store
            .insert(
                "I live in Lisbon".into(),
                vec![0.1, 0.2, 0.3],
                Metadata::new().with_role(Role::User).with_tag("turn", 4i64),
                now,
            )
            .unwrap();
        store
            .insert(
                "Noted.".into(),
                vec![0.3, 0.2, 0.1],
                Metadata::new().with_role(Role::Assistant),
                now,
            )
            .unwrap();
        store.touch(id, now);
        store
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("memory.json"));
        let store = file.load().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("memory.json"));
        let store = sample_store();
        file.save(&store).unwrap();
        assert_eq!(file.load().unwrap(), store);
    }

    #[test]
    fn snapshot_carries_version_and_dimension() {
        let bytes = SnapshotFile::encode(&sample_store()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["format_version"], 1);
        assert_eq!(value["dimension"], 3);
        assert_eq!(value["next_id"], 3);
        assert_eq!(value["entries"][0]["metadata"]["role"], "user");
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("memory.json"));
        file.save(&sample_store()).unwrap();
        file.save(&sample_store()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("memory.json")]);
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(err, MemoryError::CorruptState(_)));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(
            &path,
            br#"{"format_version": 9, "dimension": null, "next_id": 1, "entries": []}"#,
        )
        .unwrap();
        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn legacy_conversation_log_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        fs::write(&path, br#"[{"role": "user", "text": "hi"}]"#).unwrap();
        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(err, MemoryError::CorruptState(msg) if msg.contains("conversation log")));
    }

    #[test]
    fn id_beyond_counter_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("memory.json"));
        file.save(&sample_store()).unwrap();
        let raw = fs::read_to_string(file.path()).unwrap();
        fs::write(file.path(), raw.replace("\"next_id\": 3", "\"next_id\": 2")).unwrap();
        assert!(matches!(file.load(), Err(MemoryError::CorruptState(_))));
    }

    /// Save a valid store, then rewrite the file through `edit`.
    fn tampered(edit: impl FnOnce(&mut serde_json::Value)) -> (tempfile::TempDir, SnapshotFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("memory.json"));
        file.save(&sample_store()).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(file.path()).unwrap()).unwrap();
        edit(&mut value);
        fs::write(file.path(), serde_json::to_vec(&value).unwrap()).unwrap();
        (dir, file)
    }

    #[test]
    fn out_of_range_importance_is_corrupt() {
        let (_dir, file) = tampered(|v| v["entries"][0]["importance"] = 5.0.into());
        assert!(matches!(
            file.load(),
            Err(MemoryError::CorruptState(msg)) if msg.contains("importance")
        ));
        let (_dir, file) = tampered(|v| v["entries"][1]["importance"] = (-2.0).into());
        assert!(matches!(file.load(), Err(MemoryError::CorruptState(_))));
    }

    #[test]
    fn non_unit_vector_is_corrupt() {
        let (_dir, file) = tampered(|v| v["entries"][0]["embedding"] = serde_json::json!([3.0, 4.0, 0.0]));
        assert!(matches!(
            file.load(),
            Err(MemoryError::CorruptState(msg)) if msg.contains("unit length")
        ));
    }

    #[test]
    fn zero_vector_is_corrupt() {
        let (_dir, file) = tampered(|v| v["entries"][1]["embedding"] = serde_json::json!([0.0, 0.0, 0.0]));
        assert!(matches!(
            file.load(),
            Err(MemoryError::CorruptState(msg)) if msg.contains("zero norm")
        ));
    }

    #[test]
    fn zero_id_counter_is_corrupt() {
        let (_dir, file) = tampered(|v| {
            v["next_id"] = 0.into();
            v["entries"] = serde_json::json!([]);
            v["dimension"] = serde_json::Value::Null;
        });
        assert!(matches!(
            file.load(),
            Err(MemoryError::CorruptState(msg)) if msg.contains("id counter")
        ));
    }

    #[test]
    fn quarantine_moves_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(&path, b"garbage").unwrap();
        let moved = SnapshotFile::new(&path).quarantine().unwrap();
        assert!(!path.exists());
        assert_eq!(moved, dir.path().join("memory.json.corrupt"));
        assert!(moved.exists());
    }
}
