//! Persistent key/value state.
//!
//! Every key is an independent file under the state directory, so a crash
//! between two writes never damages a value that was already written.
//! Writes go to a temporary file in the same directory and are renamed into
//! place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from writing state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write state key '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to clear state key '{key}': {source}")]
    Clear {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid state key: {0}")]
    InvalidKey(String),
}

/// Durable key/value store for run flags.
///
/// Reads never fail: a missing, unreadable, or non-UTF-8 value is absent.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// Store that keeps one `<key>.txt` file per key.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.txt", key)))
    }

    fn write_atomic(&self, path: &Path, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.key_path(key).ok()?;
        match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Treating unreadable state {} as absent: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        debug!("Writing state {} = {}", key, value);
        self.write_atomic(&path, value).map_err(|source| StoreError::Write {
            key: key.to_string(),
            source,
        })
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Clear {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
pub use memory::MemoryStateStore;

#[cfg(test)]
mod memory {
    use super::{StateStore, StoreError};
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// In-memory store; clones share the same map.
    #[derive(Clone, Default)]
    pub struct MemoryStateStore {
        values: Arc<Mutex<HashMap<String, String>>>,
        fail_writes: Arc<Mutex<bool>>,
    }

    impl MemoryStateStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `set`/`clear` fail.
        pub fn fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }

        pub fn insert(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }
    }

    impl StateStore for MemoryStateStore {
        fn get(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if *self.fail_writes.lock().unwrap() {
                return Err(StoreError::Write {
                    key: key.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.insert(key, value);
            Ok(())
        }

        fn clear(&self, key: &str) -> Result<(), StoreError> {
            if *self.fail_writes.lock().unwrap() {
                return Err(StoreError::Clear {
                    key: key.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
