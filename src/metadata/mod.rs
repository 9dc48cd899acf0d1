//! Audio tag reading and writing.
//!
//! The scanner only talks to tags through the [`TagReader`] / [`TagFile`]
//! traits: open a file, ask whether it carries audio, read its tags as a
//! multi-valued map, read its audio properties and embedded picture, and
//! write tags back. [`LoftyTagReader`] is the production implementation;
//! tests substitute an in-memory reader.
//!
//! Tag keys are always upper-case Vorbis-comment style names
//! (`ARTIST`, `MUSICBRAINZ_TRACKID`, `REPLAYGAIN_TRACK_GAIN`, ...) whatever
//! the container's native tag format is.

mod reader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use reader::LoftyTagReader;

/// Multi-valued tag map keyed by upper-case field name.
pub type TagMap = HashMap<String, Vec<String>>;

/// Opens audio files for tag access.
pub trait TagReader: Send + Sync {
    /// Open `path`. Fails for files the reader cannot parse at all.
    fn open(&self, path: &Path) -> Result<Box<dyn TagFile>, TagError>;
}

/// An open audio file. Dropping it closes the file.
pub trait TagFile {
    /// Whether the file carries decodable audio.
    fn has_media(&self) -> bool;

    fn read_tags(&self) -> TagMap;

    fn read_audio_properties(&self) -> AudioProperties;

    /// Whether the tags carry any picture, without copying it.
    fn has_embedded_image(&self) -> bool;

    /// The front cover picture, or the first picture if there is no front cover.
    fn read_embedded_image(&self) -> Option<EmbeddedImage>;

    /// Replace every field named in `tags` and save. Returns `false` on failure.
    fn write_tags(&mut self, tags: &TagMap) -> bool;
}

/// Technical properties of the audio stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioProperties {
    pub duration: Duration,
    /// Kilobits per second
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioProperties {
    /// Properties with nothing set mean the file holds no audio stream.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Raw picture bytes embedded in a file's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Errors from opening a file for tag access.
#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("Failed to open {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TagError {
    pub fn open(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Open {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// First value of the first key in `keys` that is present and non-empty.
pub fn first_value<'a>(tags: &'a TagMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| tags.get(*k))
        .flat_map(|values| values.iter())
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

/// All non-empty values of the first key in `keys` that has any.
pub fn all_values(tags: &TagMap, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| tags.get(*k))
        .map(|values| {
            values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .find(|values| !values.is_empty())
        .unwrap_or_default()
}
