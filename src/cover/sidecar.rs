//! Detect folder cover images among a directory's files.
//!
//! Typical names are `front.jpg`, `folder.png` or `cover.jpeg`; which stem
//! wins is decided by [`CoverPriority`]. Only JPEG and PNG files qualify.

use std::path::{Path, PathBuf};

use super::CoverPriority;

/// A folder image and its rank in the priority list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderCover {
    pub path: PathBuf,
    pub rank: usize,
}

/// Whether the path looks like a JPEG or PNG image.
pub fn is_cover_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE && matches!(m.subtype().as_str(), "jpeg" | "png"))
}

/// Pick the best-ranked folder image among `files`.
///
/// Ties (e.g. `cover.jpg` and `cover.png`) keep the first one seen.
pub fn find_folder_cover<'a>(
    files: impl IntoIterator<Item = &'a Path>,
    priority: &CoverPriority,
) -> Option<FolderCover> {
    let mut best: Option<FolderCover> = None;
    for path in files {
        if !is_cover_image(path) {
            continue;
        }
        let Some(rank) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| priority.rank_of_stem(stem))
        else {
            continue;
        };
        if best.as_ref().is_none_or(|b| rank < b.rank) {
            best = Some(FolderCover {
                path: path.to_path_buf(),
                rank,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| Path::new("/music/album").join(n)).collect()
    }

    #[test]
    fn test_front_beats_folder_beats_cover() {
        let files = paths(&["cover.jpg", "folder.png", "front.jpeg", "01.flac"]);
        let found = find_folder_cover(files.iter().map(PathBuf::as_path), &CoverPriority::default());
        assert_eq!(found.unwrap().path, Path::new("/music/album/front.jpeg"));

        let files = paths(&["cover.jpg", "Folder.PNG"]);
        let found = find_folder_cover(files.iter().map(PathBuf::as_path), &CoverPriority::default());
        assert_eq!(found.unwrap().rank, 1);
    }

    #[test]
    fn test_ignores_unknown_names_and_formats() {
        let files = paths(&["back.jpg", "cover.gif", "cover.txt", "booklet.pdf"]);
        assert!(find_folder_cover(files.iter().map(PathBuf::as_path), &CoverPriority::default()).is_none());
    }

    #[test]
    fn test_custom_priority() {
        let priority = CoverPriority::new(&["cover", "folder"]);
        let files = paths(&["folder.jpg", "cover.png"]);
        let found = find_folder_cover(files.iter().map(PathBuf::as_path), &priority).unwrap();
        assert_eq!(found.path, Path::new("/music/album/cover.png"));
        assert_eq!(found.rank, 0);
    }

    #[test]
    fn test_is_cover_image() {
        assert!(is_cover_image(Path::new("a/cover.JPG")));
        assert!(is_cover_image(Path::new("a/cover.png")));
        assert!(!is_cover_image(Path::new("a/cover.webp")));
        assert!(!is_cover_image(Path::new("a/song.mp3")));
    }
}
