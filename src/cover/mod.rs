//! Cover art sources, rendering and caching.
//!
//! During a scan every album (and every song without an album) is given a
//! cover source: a folder image sitting next to its files, or the artwork
//! embedded in one of its files. The scanner's cover stage renders that
//! source into `<cover dir>/<entity id>`; rendered thumbnails derived from it
//! live in an [`ObjectCache`] and are invalidated whenever the cover changes.
//!
//! Which folder image wins is decided by a [`CoverPriority`] built from the
//! configured pattern list, e.g. `["front", "folder", "cover"]`. The special
//! entry `"embedded"` ranks a file's own embedded artwork at that position.

pub mod cache;
pub mod render;
pub mod sidecar;

use std::path::{Path, PathBuf};

pub use cache::{CacheError, ObjectCache};

/// Pattern that stands for a file's embedded artwork.
pub const EMBEDDED_PATTERN: &str = "embedded";

/// Where an entity's cover comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoverSource {
    /// A folder image file.
    Image(PathBuf),
    /// The artwork embedded in this audio file.
    Embedded(PathBuf),
}

impl CoverSource {
    /// The file whose modification time decides whether the cover is stale.
    pub fn path(&self) -> &Path {
        match self {
            Self::Image(path) | Self::Embedded(path) => path,
        }
    }
}

/// Ordered cover candidates, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverPriority {
    patterns: Vec<String>,
}

impl CoverPriority {
    /// Build from configured patterns. Matching is case-insensitive.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Rank of a folder image with this file stem, lower is better.
    pub fn rank_of_stem(&self, stem: &str) -> Option<usize> {
        let stem = stem.to_lowercase();
        self.patterns
            .iter()
            .position(|p| p != EMBEDDED_PATTERN && *p == stem)
    }

    /// Whether embedded artwork outranks a folder image of the given rank.
    pub fn prefers_embedded_over(&self, folder_rank: Option<usize>) -> bool {
        let Some(embedded) = self.patterns.iter().position(|p| p == EMBEDDED_PATTERN) else {
            return false;
        };
        folder_rank.is_none_or(|rank| embedded < rank)
    }
}

impl Default for CoverPriority {
    fn default() -> Self {
        Self::new(&["front", "folder", "cover"])
    }
}

/// Errors from rendering a cover.
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode embedded image: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let priority = CoverPriority::default();
        assert_eq!(priority.rank_of_stem("front"), Some(0));
        assert_eq!(priority.rank_of_stem("Folder"), Some(1));
        assert_eq!(priority.rank_of_stem("COVER"), Some(2));
        assert_eq!(priority.rank_of_stem("back"), None);
    }

    #[test]
    fn test_embedded_pattern_is_not_a_stem() {
        let priority = CoverPriority::new(&["embedded", "cover"]);
        assert_eq!(priority.rank_of_stem("embedded"), None);
        assert_eq!(priority.rank_of_stem("cover"), Some(1));
    }

    #[test]
    fn test_prefers_embedded_over() {
        let priority = CoverPriority::new(&["front", "embedded", "cover"]);
        assert!(!priority.prefers_embedded_over(Some(0)));
        assert!(priority.prefers_embedded_over(Some(2)));
        assert!(priority.prefers_embedded_over(None));

        assert!(!CoverPriority::default().prefers_embedded_over(None));
    }

    #[test]
    fn test_cover_source_path() {
        let image = CoverSource::Image(PathBuf::from("/music/a/cover.jpg"));
        let embedded = CoverSource::Embedded(PathBuf::from("/music/a/01.flac"));
        assert_eq!(image.path(), Path::new("/music/a/cover.jpg"));
        assert_eq!(embedded.path(), Path::new("/music/a/01.flac"));
    }
}
