/// Persistent per-job key/value cache
///
/// Holds arbitrary build-definition state (toolchain versions, file hashes,
/// fingerprints) between invocations. Values are stored as JSON so the engine
/// never needs to know their shape.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::logging::operations;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache variable not found: {0}")]
    KeyNotFound(String),

    #[error("failed to encode cache variable '{key}'")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache variable '{key}' has an unexpected shape")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache file is corrupt: {}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache I/O failed for {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of [`PersistentCache::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file existed and was decoded; holds the number of entries read
    Loaded { entries: usize },
    /// No cache file has been written yet
    Absent,
}

/// Durable mapping from string keys to JSON values, stored at a fixed path
#[derive(Debug)]
pub struct PersistentCache {
    path: PathBuf,
    entries: BTreeMap<String, serde_json::Value>,
}

impl PersistentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a value in memory. Nothing touches the disk until [`save`](Self::save).
    pub fn set_variable<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn has_variable(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_variable<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;

        T::deserialize(value).map_err(|source| CacheError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Raw JSON value for a key, if present
    pub fn get_raw(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn remove_variable(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.entries
    }

    /// Serialize every entry to `path`, replacing the previous contents.
    ///
    /// The data is written to a temporary file in the same directory and then
    /// renamed over the destination, so readers only ever see a complete file.
    /// The parent directory must already exist.
    pub fn save(&self) -> Result<(), CacheError> {
        let io_err = |source: io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if parent != Path::new("") => parent,
            _ => Path::new("."),
        };

        let json = serde_json::to_vec_pretty(&self.entries).map_err(|source| CacheError::Encode {
            key: "*".to_string(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(
            operation = operations::SAVE,
            entry_count = self.entries.len(),
            path = %self.path.display(),
            "cache written"
        );

        Ok(())
    }

    /// Replace the in-memory entries with the contents of `path`.
    ///
    /// A missing file is [`LoadOutcome::Absent`] and leaves the entries untouched.
    pub fn load(&mut self) -> Result<LoadOutcome, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadOutcome::Absent),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entries: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        self.entries = entries;

        debug!(
            operation = operations::LOAD,
            entry_count = self.entries.len(),
            path = %self.path.display(),
            "cache loaded"
        );

        Ok(LoadOutcome::Loaded {
            entries: self.entries.len(),
        })
    }

    /// Drop all in-memory entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
