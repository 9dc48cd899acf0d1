//! Lyrics kept in a file next to the song.
//!
//! `song.lrc` or `song.txt` beside `song.flac` replaces whatever lyrics the
//! song's own tags carry. A `.lrc` file wins over a `.txt` file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

const SIDECAR_EXTENSIONS: [&str; 2] = ["lrc", "txt"];

/// The lyrics sidecar of `song` among the sorted `files` of its directory.
pub fn find_lyrics_sidecar(song: &Path, files: &[PathBuf]) -> Option<PathBuf> {
    SIDECAR_EXTENSIONS
        .iter()
        .map(|ext| song.with_extension(ext))
        .find(|candidate| files.binary_search(candidate).is_ok())
}

/// Contents of the lyrics sidecar of `song`. Blank or unreadable files count
/// as no sidecar.
pub fn read_lyrics_sidecar(song: &Path, files: &[PathBuf]) -> Option<String> {
    let path = find_lyrics_sidecar(song, files)?;
    match fs::read(&path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            (!text.trim().is_empty()).then_some(text)
        }
        Err(e) => {
            warn!(target: "scanner::walk", path = %path.display(), error = %e, "Failed to read lyrics sidecar");
            None
        }
    }
}
