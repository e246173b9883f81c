//! Single-instance run lock.
//!
//! The lock marker is created with create-exclusive semantics and holds the
//! owner's PID. A granted lock is represented by a [`LockGuard`] which
//! releases the marker exactly once when dropped, including during unwind.
//!
//! There is no staleness detection: a marker left behind by a killed process
//! blocks every later run until an operator clears it (`--clear-lock`).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from lock operations other than contention.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock marker {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove lock marker {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Scoped ownership of a run lock.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Mutual exclusion across job invocations.
pub trait RunLock: Send + Sync {
    /// Try to take the lock. `Ok(None)` means another run holds it.
    fn try_acquire(&self) -> Result<Option<LockGuard>, LockError>;

    /// Remove the marker unconditionally.
    fn release(&self) -> Result<(), LockError>;

    /// Whether a marker currently exists.
    fn is_held(&self) -> bool;
}

/// Lock backed by a marker file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the marker, if readable.
    pub fn owner_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }
}

fn remove_marker(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl RunLock for FileLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let create_err = |source| LockError::Create {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(create_err)?;
        }

        let mut marker = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Lock {} is held by another run", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(create_err(e)),
        };

        // Release from here on even if writing the PID fails.
        let path = self.path.clone();
        let guard = LockGuard::new(move || {
            if let Err(e) = remove_marker(&path) {
                warn!("{}", e);
            } else {
                debug!("Released lock {}", path.display());
            }
        });

        if let Err(e) = writeln!(marker, "{}", std::process::id()) {
            warn!("Failed to record PID in {}: {}", self.path.display(), e);
        }

        debug!("Acquired lock {}", self.path.display());
        Ok(Some(guard))
    }

    fn release(&self) -> Result<(), LockError> {
        remove_marker(&self.path)
    }

    fn is_held(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
pub use memory::MemoryLock;

#[cfg(test)]
mod memory {
    use super::{LockError, LockGuard, RunLock};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-process lock that counts releases.
    #[derive(Clone, Default)]
    pub struct MemoryLock {
        held: Arc<AtomicBool>,
        releases: Arc<AtomicUsize>,
    }

    impl MemoryLock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl RunLock for MemoryLock {
        fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
            if self
                .held
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Ok(None);
            }
            let held = Arc::clone(&self.held);
            let releases = Arc::clone(&self.releases);
            Ok(Some(LockGuard::new(move || {
                held.store(false, Ordering::SeqCst);
                releases.fetch_add(1, Ordering::SeqCst);
            })))
        }

        fn release(&self) -> Result<(), LockError> {
            self.held.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_held(&self) -> bool {
            self.held.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_denied() {
        let temp = TempDir::new().unwrap();
        let lock = FileLock::new(temp.path().join("run.lock"));

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_guard_drop_removes_marker() {
        let temp = TempDir::new().unwrap();
        let lock = FileLock::new(temp.path().join("nested").join("run.lock"));

        {
            let _guard = lock.try_acquire().unwrap().unwrap();
            assert!(lock.is_held());
            assert_eq!(lock.owner_pid(), Some(std::process::id()));
        }

        assert!(!lock.is_held());
    }

    #[test]
    fn test_existing_marker_is_never_overwritten() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        std::fs::write(&path, "4242\n").unwrap();
        let lock = FileLock::new(&path);

        assert!(lock.try_acquire().unwrap().is_none());
        assert_eq!(lock.owner_pid(), Some(4242));
    }

    #[test]
    fn test_release_clears_stale_marker() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        std::fs::write(&path, "4242\n").unwrap();
        let lock = FileLock::new(&path);

        lock.release().unwrap();

        assert!(!lock.is_held());
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let temp = TempDir::new().unwrap();
        let lock = FileLock::new(temp.path().join("run.lock"));
        let inner = lock.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_acquire().unwrap().unwrap();
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_memory_lock_counts_releases() {
        let lock = MemoryLock::new();
        let guard = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().unwrap().is_none());
        drop(guard);
        assert_eq!(lock.releases(), 1);
        assert!(!lock.is_held());
    }
}
