//! Directory-backed object cache.
//!
//! Used for rendered cover thumbnails and for transcoded streams. Objects are
//! stored as `<cache dir>/<key>`; keys start with the id of the entity they
//! were derived from (`al_x-256`, `tr_y-opus-128`), so everything derived from
//! one entity can be dropped with [`ObjectCache::invalidate`].
//!
//! The key index is shared between scanner workers, so every operation is
//! safe to call concurrently, including deleting the same key twice.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keyed blob cache in one directory.
#[derive(Debug)]
pub struct ObjectCache {
    dir: PathBuf,
    keys: RwLock<BTreeSet<String>>,
}

impl ObjectCache {
    /// Open the cache in `dir`, creating it and indexing existing objects.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let entries = fs::read_dir(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        let keys = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|k| !k.ends_with(".tmp"))
            .collect();

        Ok(Self {
            dir,
            keys: RwLock::new(keys),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store an object, replacing any previous one under `key`.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.object_path(key)?;
        let temp = self.dir.join(format!("{key}.tmp"));
        fs::write(&temp, data)
            .and_then(|()| fs::rename(&temp, &path))
            .map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
        self.keys.write().insert(key.to_string());
        Ok(path)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.keys.read().contains(key) {
            return None;
        }
        fs::read(self.object_path(key).ok()?).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.read().contains(key)
    }

    /// Snapshot of all keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.keys.read().iter().cloned().collect()
    }

    /// Delete one object. Returns `false` if it was already gone.
    ///
    /// Of several concurrent deletes of one key exactly one returns `true`.
    pub fn delete_object(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.object_path(key)?;
        let indexed = self.keys.write().remove(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(indexed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(indexed),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Delete every object whose key starts with `prefix`.
    ///
    /// Failures are logged and skipped; returns how many objects were removed.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let matching: Vec<String> = self
            .keys
            .read()
            .range(prefix.to_string()..)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect();

        let mut removed = 0;
        for key in matching {
            match self.delete_object(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(target: "cache", key = %key, error = %e, "Failed to delete cache object");
                }
            }
        }
        if removed > 0 {
            tracing::debug!(target: "cache", dir = %self.dir.display(), prefix, removed, "Invalidated cache objects");
        }
        removed
    }

    /// Delete every object.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in self.keys() {
            if self.delete_object(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Total size of all indexed objects in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.keys
            .read()
            .iter()
            .filter_map(|k| fs::metadata(self.dir.join(k)).ok())
            .map(|m| m.len())
            .sum()
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\'])
            && !key.ends_with(".tmp");
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}
