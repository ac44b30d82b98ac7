//! Failure record: how many consecutive attempts failed, when, and why.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StateError;
use crate::record::Record;

/// Prefix of a reason string that latches retries until the config changes.
pub const CONFIG_ERROR_MARKER: &str = "configuration error";

const KEY_COUNT: &str = "number_of_failures";
const KEY_LAST: &str = "last_runtime";
const KEY_REASON: &str = "reason";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub count: u32,
    pub last_failure_epoch: i64,
    pub reason: String,
}

impl FailureRecord {
    pub fn is_config_error(&self) -> bool {
        self.reason.starts_with(CONFIG_ERROR_MARKER)
    }
}

/// Storage for the failure record of one target.
pub trait FailureStore {
    fn load(&self) -> Result<Option<FailureRecord>, StateError>;
    fn save(&self, reason: &str, count: u32, timestamp: i64) -> Result<(), StateError>;
    fn clear(&self) -> Result<(), StateError>;
}

pub struct FileFailureStore {
    path: PathBuf,
}

impl FileFailureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, detail: impl Into<String>) -> StateError {
        StateError::CorruptState {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }
}

impl FailureStore for FileFailureStore {
    fn load(&self) -> Result<Option<FailureRecord>, StateError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&self.path, e)),
        };
        let record = Record::parse(&text).map_err(|e| self.corrupt(e.to_string()))?;

        let count = record
            .get(KEY_COUNT)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|c| *c >= 1)
            .ok_or_else(|| {
                self.corrupt(format!("`{KEY_COUNT}` must be a positive integer"))
            })?;
        let last_failure_epoch = record
            .get(KEY_LAST)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|t| *t >= 0)
            .ok_or_else(|| {
                self.corrupt(format!("`{KEY_LAST}` must be a non-negative integer"))
            })?;
        let reason = record.get(KEY_REASON).unwrap_or_default().to_string();

        Ok(Some(FailureRecord {
            count,
            last_failure_epoch,
            reason,
        }))
    }

    /// Written to a temporary file in the same directory and renamed over
    /// the record, so readers see either the old or the new content.
    fn save(&self, reason: &str, count: u32, timestamp: i64) -> Result<(), StateError> {
        let mut record = Record::default();
        record.push(KEY_COUNT, count);
        record.push(KEY_LAST, timestamp);
        record.push(KEY_REASON, reason);

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
        tmp.write_all(record.render().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StateError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StateError::io(&self.path, e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io(&self.path, e)),
        }
    }
}

/// In-memory store for orchestrator tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryFailureStore {
    record: std::sync::Mutex<Option<FailureRecord>>,
}

#[cfg(test)]
impl MemoryFailureStore {
    pub(crate) fn with(record: FailureRecord) -> Self {
        Self {
            record: std::sync::Mutex::new(Some(record)),
        }
    }

    pub(crate) fn snapshot(&self) -> Option<FailureRecord> {
        self.record.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl FailureStore for MemoryFailureStore {
    fn load(&self) -> Result<Option<FailureRecord>, StateError> {
        Ok(self.snapshot())
    }

    fn save(&self, reason: &str, count: u32, timestamp: i64) -> Result<(), StateError> {
        *self.record.lock().unwrap() = Some(FailureRecord {
            count,
            last_failure_epoch: timestamp,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        *self.record.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (FileFailureStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = FileFailureStore::new(dir.path().join("home.failures"));
        (store, dir)
    }

    #[test]
    fn test_load_absent_is_none() {
        let (store, _dir) = make_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let (store, _dir) = make_store();
        store
            .save("configuration error: bad credentials", 2, 1_700_000_000)
            .unwrap();
        let rec = store.load().unwrap().unwrap();
        assert_eq!(
            rec,
            FailureRecord {
                count: 2,
                last_failure_epoch: 1_700_000_000,
                reason: "configuration error: bad credentials".into(),
            }
        );
        assert!(rec.is_config_error());
    }

    #[test]
    fn test_save_overwrites() {
        let (store, _dir) = make_store();
        store.save("first", 1, 10).unwrap();
        store.save("second", 2, 20).unwrap();
        let rec = store.load().unwrap().unwrap();
        assert_eq!(rec.count, 2);
        assert_eq!(rec.reason, "second");
    }

    #[test]
    fn test_save_uses_persisted_field_names() {
        let (store, _dir) = make_store();
        store.save("sync client exited with status 1", 1, 42).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "number_of_failures: 1\nlast_runtime: 42\nreason: sync client exited with status 1\n"
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, _dir) = make_store();
        store.clear().unwrap();
        store.save("x", 1, 1).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_zero_count_is_corrupt() {
        let (store, _dir) = make_store();
        std::fs::write(
            store.path(),
            "number_of_failures: 0\nlast_runtime: 5\nreason: x\n",
        )
        .unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            StateError::CorruptState { .. }
        ));
    }

    #[test]
    fn test_negative_timestamp_is_corrupt() {
        let (store, _dir) = make_store();
        std::fs::write(
            store.path(),
            "number_of_failures: 3\nlast_runtime: -1\nreason: x\n",
        )
        .unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            StateError::CorruptState { .. }
        ));
    }

    #[test]
    fn test_garbage_is_corrupt_and_left_in_place() {
        let (store, _dir) = make_store();
        std::fs::write(store.path(), "not a record\n").unwrap();
        assert!(store.load().is_err());
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "not a record\n"
        );
    }

    #[test]
    fn test_missing_reason_reads_as_empty() {
        let (store, _dir) = make_store();
        std::fs::write(store.path(), "number_of_failures: 1\nlast_runtime: 5\n").unwrap();
        let rec = store.load().unwrap().unwrap();
        assert_eq!(rec.reason, "");
        assert!(!rec.is_config_error());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryFailureStore::default();
        store.save("r", 4, 99).unwrap();
        assert_eq!(store.load().unwrap().unwrap().count, 4);
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
