//! Test utilities and fixtures for subminder tests.
//!
//! This module provides a temporary database and an in-memory tag reader so
//! that scans can run against real directory trees without real audio files.
//!
//! # Example
//!
//! ```ignore
//! use subminder::test_utils::{temp_db, FakeTagReader, tags};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let reader = FakeTagReader::default();
//!     let path = reader.add(music.join("a.mp3"), tags(&[("TITLE", &["A"])]));
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::metadata::{AudioProperties, EmbeddedImage, TagError, TagFile, TagMap, TagReader};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically. Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = crate::db::db_url(Some(&db_path));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Build a [`TagMap`] from literal pairs.
pub fn tags(pairs: &[(&str, &[&str])]) -> TagMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

#[derive(Debug, Clone)]
struct FakeEntry {
    tags: TagMap,
    properties: AudioProperties,
    image: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeState {
    entries: HashMap<String, FakeEntry>,
    next_token: u64,
}

/// In-memory [`TagReader`].
///
/// Each registered file is written to disk with a unique token as its only
/// content, and tags are looked up by that token. Renaming or moving the file
/// on disk therefore keeps its tags, like a real audio file would.
#[derive(Debug, Default)]
pub struct FakeTagReader {
    state: Arc<Mutex<FakeState>>,
    writes: Arc<AtomicU64>,
}

impl FakeTagReader {
    /// Create an audio file at `path` with the given tags.
    pub fn add(&self, path: impl Into<PathBuf>, tags: TagMap) -> PathBuf {
        self.insert(
            path.into(),
            FakeEntry {
                tags,
                properties: AudioProperties {
                    duration: Duration::from_secs(180),
                    bit_rate: 320,
                    sample_rate: 44_100,
                    channels: 2,
                },
                image: None,
            },
        )
    }

    /// Create a file the reader can open but that has no audio stream.
    pub fn add_silent(&self, path: impl Into<PathBuf>) -> PathBuf {
        self.insert(
            path.into(),
            FakeEntry {
                tags: TagMap::new(),
                properties: AudioProperties::default(),
                image: None,
            },
        )
    }

    /// Embed a picture in a registered file.
    pub fn set_image(&self, path: &Path, data: Vec<u8>) {
        self.update(path, |entry| entry.image = Some(data));
    }

    /// Replace a registered file's tags.
    pub fn set_tags(&self, path: &Path, tags: TagMap) {
        self.update(path, |entry| entry.tags = tags);
    }

    /// Current tags of a registered file.
    pub fn tags_of(&self, path: &Path) -> TagMap {
        let token = read_token(path).unwrap_or_default();
        self.state
            .lock()
            .entries
            .get(&token)
            .map(|e| e.tags.clone())
            .unwrap_or_default()
    }

    /// Number of successful `write_tags` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn insert(&self, path: PathBuf, entry: FakeEntry) -> PathBuf {
        let token = {
            let mut state = self.state.lock();
            state.next_token += 1;
            let token = format!("fake-audio-{}", state.next_token);
            state.entries.insert(token.clone(), entry);
            token
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, token).expect("Failed to write fake audio file");
        path
    }

    fn update(&self, path: &Path, f: impl FnOnce(&mut FakeEntry)) {
        let token = read_token(path).expect("Not a fake audio file");
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&token).expect("Unregistered fake audio file");
        f(entry);
    }
}

fn read_token(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

impl TagReader for FakeTagReader {
    fn open(&self, path: &Path) -> Result<Box<dyn TagFile>, TagError> {
        let token = read_token(path).ok_or_else(|| TagError::open(path, "unreadable"))?;
        let entry = self
            .state
            .lock()
            .entries
            .get(&token)
            .cloned()
            .ok_or_else(|| TagError::open(path, "unsupported format"))?;
        Ok(Box::new(FakeFile {
            path: path.to_path_buf(),
            token,
            entry,
            state: Arc::clone(&self.state),
            writes: Arc::clone(&self.writes),
        }))
    }
}

struct FakeFile {
    path: PathBuf,
    token: String,
    entry: FakeEntry,
    state: Arc<Mutex<FakeState>>,
    writes: Arc<AtomicU64>,
}

impl TagFile for FakeFile {
    fn has_media(&self) -> bool {
        !self.entry.properties.is_empty()
    }

    fn read_tags(&self) -> TagMap {
        self.entry.tags.clone()
    }

    fn read_audio_properties(&self) -> AudioProperties {
        self.entry.properties
    }

    fn has_embedded_image(&self) -> bool {
        self.entry.image.is_some()
    }

    fn read_embedded_image(&self) -> Option<EmbeddedImage> {
        self.entry.image.clone().map(|data| EmbeddedImage {
            data,
            mime_type: Some("image/png".to_string()),
        })
    }

    fn write_tags(&mut self, tags: &TagMap) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&self.token) else {
            return false;
        };
        for (key, values) in tags {
            entry.tags.insert(key.clone(), values.clone());
        }
        self.entry.tags = entry.tags.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        // Saving tags rewrites the file like a real tag writer would
        std::fs::File::options()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_modified(SystemTime::now()))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(crate::db::songs::count(&mut conn).await.unwrap(), 0);
    }

    #[test]
    fn test_fake_reader_follows_renames() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FakeTagReader::default();
        let path = reader.add(dir.path().join("a.mp3"), tags(&[("TITLE", &["A"])]));

        let moved = dir.path().join("moved.mp3");
        std::fs::rename(&path, &moved).unwrap();

        let file = reader.open(&moved).unwrap();
        assert_eq!(file.read_tags()["TITLE"], vec!["A"]);
        assert!(file.has_media());
    }

    #[test]
    fn test_fake_reader_write_tags() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FakeTagReader::default();
        let path = reader.add(dir.path().join("a.mp3"), tags(&[]));

        let mut file = reader.open(&path).unwrap();
        assert!(file.write_tags(&tags(&[("X", &["1"])])));

        assert_eq!(reader.tags_of(&path)["X"], vec!["1"]);
        assert_eq!(reader.write_count(), 1);
        assert!(!file.has_embedded_image());
    }
}
