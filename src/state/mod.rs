//! Persisted per-target state: lock token, failure record and logs.

pub mod failure;
pub mod lock;
pub mod log;

pub use failure::{FailureRecord, FailureStore, FileFailureStore, CONFIG_ERROR_MARKER};
pub use lock::{Acquire, InstanceLock, Liveness, LockGuard, ProcessLiveness};
pub use log::{AttemptLog, OutputLog};

use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::errors::StateError;

/// File locations for one managed target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub lock: PathBuf,
    pub failures: PathBuf,
    pub attempt_log: PathBuf,
    pub output_log: PathBuf,
}

impl StatePaths {
    /// `<dir>/<stem>.{lock,failures,log,output}`.
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            lock: dir.join(format!("{stem}.lock")),
            failures: dir.join(format!("{stem}.failures")),
            attempt_log: dir.join(format!("{stem}.log")),
            output_log: dir.join(format!("{stem}.output")),
        }
    }

    /// Paths named after the config file, inside its state directory.
    pub fn for_config(config: &SyncConfig) -> Self {
        let stem = config
            .config_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "synctick".to_string());
        Self::new(&config.state_dir, &stem)
    }

    pub fn ensure_dir(&self) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_stem() {
        let paths = StatePaths::new(Path::new("/var/lib/synctick"), "photos");
        assert_eq!(paths.lock, PathBuf::from("/var/lib/synctick/photos.lock"));
        assert_eq!(paths.failures, PathBuf::from("/var/lib/synctick/photos.failures"));
        assert_eq!(paths.attempt_log, PathBuf::from("/var/lib/synctick/photos.log"));
        assert_eq!(paths.output_log, PathBuf::from("/var/lib/synctick/photos.output"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(&dir.path().join("a/b"), "x");
        paths.ensure_dir().unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
