//! Cross-invocation instance lock.
//!
//! The lock is a small `pid: <n>` file next to the other state files. A tick
//! owns the target while the file names its process id. A file naming a
//! process that no longer exists is stale and gets reclaimed.
//!
//! Creation does not trust any single filesystem call to be race free: the
//! token is created without clobbering, then read back, and the tick only
//! proceeds if the file still names its own pid.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StateError;
use crate::record::Record;

const KEY_PID: &str = "pid";

/// Answers whether a process id belongs to a running process.
pub trait Liveness {
    fn is_alive(&self, pid: u32) -> bool;
}

impl<F: Fn(u32) -> bool> Liveness for F {
    fn is_alive(&self, pid: u32) -> bool {
        self(pid)
    }
}

/// Liveness of local processes via `kill(pid, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLiveness;

impl Liveness for ProcessLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let Ok(pid_i32) = i32::try_from(pid) else {
            return false;
        };
        #[cfg(unix)]
        {
            // SAFETY: signal 0 performs only the existence and permission
            // check, nothing is delivered.
            #[allow(unsafe_code)]
            let result = unsafe { libc::kill(pid_i32, 0) };
            if result == 0 {
                return true;
            }
            // EPERM: the process exists but belongs to someone else.
            std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        }
        #[cfg(not(unix))]
        {
            let _ = pid_i32;
            true
        }
    }
}

/// Result of [`InstanceLock::try_acquire`].
#[derive(Debug)]
pub enum Acquire {
    Acquired(LockGuard),
    /// Another live process holds the lock, or won the race to create it.
    AlreadyRunning { owner: Option<u32> },
}

pub struct InstanceLock<L> {
    path: PathBuf,
    liveness: L,
}

impl<L: Liveness> InstanceLock<L> {
    pub fn new(path: impl Into<PathBuf>, liveness: L) -> Self {
        Self {
            path: path.into(),
            liveness,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid named by the current token, if any.
    pub fn owner(&self) -> Result<Option<u32>, StateError> {
        read_owner(&self.path)
    }

    pub fn is_owner_alive(&self, pid: u32) -> bool {
        self.liveness.is_alive(pid)
    }

    pub fn try_acquire(&self, self_pid: u32) -> Result<Acquire, StateError> {
        self.acquire_with(self_pid, |pid| self.write_token(pid))
    }

    fn acquire_with(
        &self,
        self_pid: u32,
        write: impl FnOnce(u32) -> Result<bool, StateError>,
    ) -> Result<Acquire, StateError> {
        if let Some(pid) = read_owner(&self.path)? {
            if pid != self_pid && self.liveness.is_alive(pid) {
                tracing::debug!(pid, "lock held by running process");
                return Ok(Acquire::AlreadyRunning { owner: Some(pid) });
            }
            if let Some(owner) = self.reclaim_stale(pid, self_pid)? {
                return Ok(Acquire::AlreadyRunning { owner: Some(owner) });
            }
        }

        if !write(self_pid)? {
            tracing::debug!("lock created concurrently by another process");
            return Ok(Acquire::AlreadyRunning {
                owner: read_owner(&self.path).ok().flatten(),
            });
        }

        match read_owner(&self.path) {
            Ok(Some(pid)) if pid == self_pid => Ok(Acquire::Acquired(LockGuard {
                path: self.path.clone(),
                pid: self_pid,
                released: false,
            })),
            Ok(owner) => {
                tracing::debug!(?owner, "lost lock race after write");
                Ok(Acquire::AlreadyRunning { owner })
            }
            Err(_) => Ok(Acquire::AlreadyRunning { owner: None }),
        }
    }

    /// Moves a stale token aside and deletes it if it still names `stale_pid`.
    ///
    /// A token that changed in between belongs to a tick that reclaimed the
    /// lock first; it is put back and its owner returned.
    fn reclaim_stale(&self, stale_pid: u32, self_pid: u32) -> Result<Option<u32>, StateError> {
        tracing::info!(pid = stale_pid, path = %self.path.display(), "removing stale lock");
        let aside = self.path.with_extension(format!("lock.stale.{self_pid}"));
        match std::fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&self.path, e)),
        }

        let moved = read_owner(&aside);
        if let Ok(Some(pid)) = moved
            && pid != stale_pid
        {
            tracing::debug!(pid, "stale lock was already reclaimed, restoring token");
            if std::fs::hard_link(&aside, &self.path).is_err() {
                tracing::debug!("lock recreated meanwhile, dropping moved token");
            }
            std::fs::remove_file(&aside).map_err(|e| StateError::io(&aside, e))?;
            return Ok(Some(pid));
        }
        std::fs::remove_file(&aside).map_err(|e| StateError::io(&aside, e))?;
        Ok(None)
    }

    /// Creates the token unless one exists. Returns `false` if it existed.
    fn write_token(&self, pid: u32) -> Result<bool, StateError> {
        let mut record = Record::default();
        record.push(KEY_PID, pid);

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
        tmp.write_all(record.render().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StateError::io(tmp.path(), e))?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StateError::io(&self.path, e.error)),
        }
    }
}

/// A held lock. Release it explicitly with [`LockGuard::release`]; dropping
/// an unreleased guard removes the token on a best-effort basis.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn release(mut self) -> Result<(), StateError> {
        self.released = true;
        remove_if_owned(&self.path, self.pid)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = remove_if_owned(&self.path, self.pid)
        {
            tracing::warn!(error = %e, "failed to release lock");
        }
    }
}

fn remove_if_owned(path: &Path, pid: u32) -> Result<(), StateError> {
    match read_owner(path) {
        Ok(Some(owner)) if owner == pid => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io(path, e)),
        },
        Ok(None) => Ok(()),
        Ok(Some(owner)) => {
            tracing::warn!(owner, pid, "lock now names another process, leaving it");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn read_owner(path: &Path) -> Result<Option<u32>, StateError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path, e)),
    };
    let bad = |detail: String| StateError::BadLockFile {
        path: path.to_path_buf(),
        detail,
    };
    let record = Record::parse(&text).map_err(|e| bad(e.to_string()))?;
    let pid = record
        .get(KEY_PID)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| bad(format!("`{KEY_PID}` must be a positive integer")))?;
    Ok(Some(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lock_in(dir: &Path, alive: &'static [u32]) -> InstanceLock<impl Liveness> {
        InstanceLock::new(dir.join("home.lock"), move |pid: u32| alive.contains(&pid))
    }

    #[test]
    fn test_acquire_fresh_writes_token() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        let Acquire::Acquired(guard) = lock.try_acquire(100).unwrap() else {
            panic!("expected Acquired");
        };
        assert_eq!(guard.pid(), 100);
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            "pid: 100\n"
        );
        guard.release().unwrap();
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        std::fs::write(lock.path(), "pid: 4242\n").unwrap();

        let result = lock.try_acquire(100).unwrap();
        assert!(matches!(result, Acquire::Acquired(_)));
        assert_eq!(lock.owner().unwrap(), Some(100));
    }

    #[test]
    fn test_live_lock_blocks_and_is_untouched() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[4242]);
        std::fs::write(lock.path(), "pid: 4242\n").unwrap();

        match lock.try_acquire(100).unwrap() {
            Acquire::AlreadyRunning { owner } => assert_eq!(owner, Some(4242)),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            "pid: 4242\n"
        );
    }

    #[test]
    fn test_own_pid_in_leftover_token_is_stale() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[100]);
        std::fs::write(lock.path(), "pid: 100\n").unwrap();
        assert!(matches!(
            lock.try_acquire(100).unwrap(),
            Acquire::Acquired(_)
        ));
    }

    #[test]
    fn test_malformed_token_is_fatal_and_kept() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        std::fs::write(lock.path(), "pid: abc\n").unwrap();

        let err = lock.try_acquire(100).unwrap_err();
        assert!(matches!(err, StateError::BadLockFile { .. }));
        assert_eq!(std::fs::read_to_string(lock.path()).unwrap(), "pid: abc\n");
    }

    #[test]
    fn test_empty_token_is_fatal() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        std::fs::write(lock.path(), "").unwrap();
        assert!(matches!(
            lock.try_acquire(100).unwrap_err(),
            StateError::BadLockFile { .. }
        ));
    }

    #[test]
    fn test_second_acquire_while_held_is_already_running() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[100]);
        let Acquire::Acquired(guard) = lock.try_acquire(100).unwrap() else {
            panic!("expected Acquired");
        };
        assert!(matches!(
            lock.try_acquire(200).unwrap(),
            Acquire::AlreadyRunning { owner: Some(100) }
        ));
        guard.release().unwrap();
    }

    #[test]
    fn test_drop_releases_guard() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        {
            let _acquired = lock.try_acquire(100).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_release_leaves_token_of_other_process() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        let Acquire::Acquired(guard) = lock.try_acquire(100).unwrap() else {
            panic!("expected Acquired");
        };
        std::fs::write(lock.path(), "pid: 200\n").unwrap();
        guard.release().unwrap();
        assert_eq!(lock.owner().unwrap(), Some(200));
    }

    #[test]
    fn test_token_created_concurrently_concedes() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        let result = lock
            .acquire_with(100, |_| {
                std::fs::write(lock.path(), "pid: 300\n").unwrap();
                Ok(false)
            })
            .unwrap();

        assert!(matches!(result, Acquire::AlreadyRunning { owner: Some(300) }));
        assert_eq!(lock.owner().unwrap(), Some(300));
    }

    #[test]
    fn test_token_overwritten_after_write_concedes() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        let result = lock
            .acquire_with(100, |pid| {
                assert!(lock.write_token(pid)?);
                std::fs::write(lock.path(), "pid: 300\n").unwrap();
                Ok(true)
            })
            .unwrap();

        assert!(matches!(result, Acquire::AlreadyRunning { owner: Some(300) }));
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            "pid: 300\n"
        );
    }

    #[test]
    fn test_reclaim_keeps_token_of_faster_tick() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        // Another tick already replaced the stale pid 4242 with its own token.
        std::fs::write(lock.path(), "pid: 300\n").unwrap();

        assert_eq!(lock.reclaim_stale(4242, 100).unwrap(), Some(300));
        assert_eq!(lock.owner().unwrap(), Some(300));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_reclaim_removes_stale_token() {
        let dir = tempdir().unwrap();
        let lock = lock_in(dir.path(), &[]);
        std::fs::write(lock.path(), "pid: 4242\n").unwrap();

        assert_eq!(lock.reclaim_stale(4242, 100).unwrap(), None);
        assert!(!lock.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_process_liveness_sees_self() {
        assert!(ProcessLiveness.is_alive(std::process::id()));
        assert!(!ProcessLiveness.is_alive(0));
        assert!(!ProcessLiveness.is_alive(u32::MAX));
    }
}
