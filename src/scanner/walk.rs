//! Concurrent directory walk.
//!
//! One blocking task enumerates directories with `walkdir` and hands them to a
//! pool of blocking workers over a bounded crossbeam channel. Each worker
//! lists its directory once, picks the folder cover, extracts every audio file
//! and pushes the results onto the song queue. When the walk returns, every
//! clone of the queue sender has been dropped, which is what closes the queue.
//!
//! Workers also note artist images: a folder image matching the artist image
//! patterns belongs to the artist named like its directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ScanError;
use super::extract::{MediaFile, extract};
use super::lyrics::read_lyrics_sidecar;
use crate::cover::sidecar::{FolderCover, find_folder_cover};
use crate::cover::{CoverPriority, CoverSource};
use crate::metadata::TagReader;

/// What to walk and how.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub root: PathBuf,
    pub workers: usize,
    pub scan_hidden: bool,
    pub cover_priority: CoverPriority,
    pub artist_image_priority: CoverPriority,
    /// Tag holding stamped song ids
    pub id_tag: String,
}

/// Totals of one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub media_files: u64,
}

/// Best artist image per directory name.
pub type ArtistImages = BTreeMap<String, FolderCover>;

/// Everything a walk reports besides the files it queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOutput {
    pub stats: WalkStats,
    pub artist_images: ArtistImages,
}

impl WalkOutput {
    fn merge(&mut self, other: WalkOutput) {
        self.stats.directories += other.stats.directories;
        self.stats.media_files += other.stats.media_files;
        for (name, image) in other.artist_images {
            add_artist_image(&mut self.artist_images, name, image);
        }
    }
}

/// Keep the better ranked image, then the one with the smaller path.
fn add_artist_image(images: &mut ArtistImages, name: String, image: FolderCover) {
    match images.get(&name) {
        Some(current) if (current.rank, &current.path) <= (image.rank, &image.path) => {}
        _ => {
            images.insert(name, image);
        }
    }
}

/// Whether the path looks like an audio file.
pub fn is_audio_file(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::AUDIO)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Walk `options.root`, sending one [`MediaFile`] per audio file to `queue`.
///
/// `processed` counts audio files as they are visited. Only an unreadable
/// root is fatal; everything below it is logged and skipped.
pub async fn walk(
    options: WalkOptions,
    reader: Arc<dyn TagReader>,
    queue: mpsc::Sender<MediaFile>,
    cancel: CancellationToken,
    processed: Arc<AtomicU64>,
) -> Result<WalkOutput, ScanError> {
    if let Err(source) = fs::read_dir(&options.root) {
        return Err(ScanError::RootUnreadable {
            path: options.root.clone(),
            source,
        });
    }

    let workers = options.workers.max(1);
    let (dir_tx, dir_rx) = crossbeam_channel::bounded::<PathBuf>(workers * 2);
    let options = Arc::new(options);

    let mut tasks = JoinSet::new();
    {
        let options = Arc::clone(&options);
        let cancel = cancel.clone();
        tasks.spawn_blocking(move || {
            enumerate_directories(&options, dir_tx, &cancel);
            WalkOutput::default()
        });
    }
    for _ in 0..workers {
        let worker = DirWorker {
            options: Arc::clone(&options),
            reader: Arc::clone(&reader),
            queue: queue.clone(),
            cancel: cancel.clone(),
            processed: Arc::clone(&processed),
        };
        let dir_rx = dir_rx.clone();
        tasks.spawn_blocking(move || worker.run(dir_rx));
    }
    // The workers own the only remaining receivers and senders
    drop(dir_rx);
    drop(queue);

    let mut output = WalkOutput::default();
    while let Some(joined) = tasks.join_next().await {
        output.merge(joined?);
    }
    Ok(output)
}

fn enumerate_directories(
    options: &WalkOptions,
    dir_tx: crossbeam_channel::Sender<PathBuf>,
    cancel: &CancellationToken,
) {
    let scan_hidden = options.scan_hidden;
    let entries = WalkDir::new(&options.root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || scan_hidden || !is_hidden(e.file_name()));

    for entry in entries {
        if cancel.is_cancelled() {
            debug!(target: "scanner::walk", "Walk cancelled");
            break;
        }
        match entry {
            Ok(entry) if entry.file_type().is_dir() => {
                if dir_tx.send(entry.into_path()).is_err() {
                    // Every worker is gone
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "scanner::walk", path = ?e.path(), error = %e, "Skipping unreadable directory entry");
            }
        }
    }
}

struct DirWorker {
    options: Arc<WalkOptions>,
    reader: Arc<dyn TagReader>,
    queue: mpsc::Sender<MediaFile>,
    cancel: CancellationToken,
    processed: Arc<AtomicU64>,
}

impl DirWorker {
    fn run(self, dir_rx: crossbeam_channel::Receiver<PathBuf>) -> WalkOutput {
        let mut output = WalkOutput::default();
        for dir in dir_rx.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            output.stats.directories += 1;
            match self.visit(&dir, &mut output.artist_images) {
                Ok(sent) => output.stats.media_files += sent,
                Err(Stop) => break,
            }
        }
        output
    }

    /// Process one directory. Returns the number of media files sent.
    fn visit(&self, dir: &Path, artist_images: &mut ArtistImages) -> Result<u64, Stop> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "scanner::walk", path = %dir.display(), error = %e, "Failed to read directory");
                return Ok(0);
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| self.options.scan_hidden || !is_hidden(&e.file_name()))
            .map(|e| e.path())
            // fs::metadata follows symlinks
            .filter(|p| fs::metadata(p).map(|m| m.is_file()).unwrap_or(false))
            .collect();
        files.sort();

        if dir != self.options.root {
            let image = find_folder_cover(files.iter().map(PathBuf::as_path), &self.options.artist_image_priority);
            let name = dir.file_name().map(|n| n.to_string_lossy().into_owned());
            if let (Some(image), Some(name)) = (image, name) {
                add_artist_image(artist_images, name, image);
            }
        }

        let folder = find_folder_cover(files.iter().map(PathBuf::as_path), &self.options.cover_priority);
        let embedded_first = self
            .options
            .cover_priority
            .prefers_embedded_over(folder.as_ref().map(|f| f.rank));

        let mut found = Vec::new();
        for path in files.iter().filter(|p| is_audio_file(p)) {
            if self.cancel.is_cancelled() {
                return Err(Stop);
            }
            self.processed.fetch_add(1, Ordering::Relaxed);

            match extract(self.reader.as_ref(), path, &self.options.id_tag) {
                Ok(Some(mut media)) => {
                    if let Some(lyrics) = read_lyrics_sidecar(path, &files) {
                        media.lyrics = Some(lyrics);
                    }
                    found.push(media);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "scanner::walk", path = %path.display(), error = %e, "Failed to read file, skipping");
                }
            }
        }

        // Siblings without artwork share the first file that has some,
        // wherever it sorts in the directory
        let shared_embedded = found
            .iter()
            .find(|m| m.has_embedded_image)
            .map(|m| m.path.clone());

        let mut sent = 0;
        for mut media in found {
            media.cover = match &folder {
                _ if media.has_embedded_image && embedded_first => {
                    Some(CoverSource::Embedded(media.path.clone()))
                }
                Some(folder) => Some(CoverSource::Image(folder.path.clone())),
                None if media.has_embedded_image => Some(CoverSource::Embedded(media.path.clone())),
                None => shared_embedded.clone().map(CoverSource::Embedded),
            };

            if self.queue.blocking_send(media).is_err() {
                // Consumer is gone, the scan is failing
                return Err(Stop);
            }
            sent += 1;
        }
        Ok(sent)
    }
}

/// The worker must stop taking directories.
struct Stop;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTagReader, tags};

    fn options(root: &Path) -> WalkOptions {
        WalkOptions {
            root: root.to_path_buf(),
            workers: 3,
            scan_hidden: false,
            cover_priority: CoverPriority::default(),
            artist_image_priority: CoverPriority::new(&["artist"]),
            id_tag: "SUBMINDER_ID_TEST".to_string(),
        }
    }

    async fn run(options: WalkOptions, reader: Arc<FakeTagReader>) -> (WalkOutput, Vec<MediaFile>) {
        let (tx, mut rx) = mpsc::channel(4);
        let collector = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(m) = rx.recv().await {
                out.push(m);
            }
            out
        });
        let output = walk(
            options,
            reader,
            tx,
            CancellationToken::new(),
            Arc::new(AtomicU64::new(0)),
        )
        .await
        .unwrap();
        let mut files = collector.await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        (output, files)
    }

    #[tokio::test]
    async fn test_walk_finds_audio_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(root.join("a.mp3"), tags(&[("TITLE", &["A"])]));
        reader.add(root.join("sub/deeper/b.flac"), tags(&[("TITLE", &["B"])]));
        std::fs::write(root.join("notes.txt"), b"ignore").unwrap();
        reader.add(root.join(".hidden/c.mp3"), tags(&[]));
        reader.add(root.join("sub/.d.mp3"), tags(&[]));

        let (output, files) = run(options(root), reader).await;

        let titles: Vec<_> = files.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(output.stats.media_files, 2);
        assert_eq!(output.stats.directories, 3);
    }

    #[tokio::test]
    async fn test_walk_scans_hidden_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(dir.path().join(".hidden/c.mp3"), tags(&[]));

        let mut opts = options(dir.path());
        opts.scan_hidden = true;
        let (_, files) = run(opts, reader).await;
        assert_eq!(files.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(outside.path().join("linked/x.mp3"), tags(&[]));
        std::os::unix::fs::symlink(outside.path().join("linked"), dir.path().join("link")).unwrap();

        let (_, files) = run(options(dir.path()), reader).await;
        assert_eq!(files.len(), 1);
        assert!(files[0].path.starts_with(dir.path().join("link")));
    }

    #[tokio::test]
    async fn test_walk_assigns_folder_cover() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("album");
        let reader = Arc::new(FakeTagReader::default());
        let song = reader.add(album.join("01.mp3"), tags(&[]));
        reader.set_image(&song, vec![1]);
        std::fs::write(album.join("cover.jpg"), b"jpg").unwrap();
        std::fs::write(album.join("front.png"), b"png").unwrap();

        let (_, files) = run(options(dir.path()), reader).await;
        assert_eq!(files[0].cover, Some(CoverSource::Image(album.join("front.png"))));
    }

    #[tokio::test]
    async fn test_walk_reuses_embedded_art_for_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        let first = reader.add(dir.path().join("01.mp3"), tags(&[]));
        reader.set_image(&first, vec![1]);
        reader.add(dir.path().join("02.mp3"), tags(&[]));

        let (_, files) = run(options(dir.path()), reader).await;
        assert_eq!(files[0].cover, Some(CoverSource::Embedded(first.clone())));
        assert_eq!(files[1].cover, Some(CoverSource::Embedded(first)));
    }

    #[tokio::test]
    async fn test_walk_shares_embedded_art_sorted_after_bare_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(dir.path().join("01.mp3"), tags(&[]));
        let second = reader.add(dir.path().join("02.mp3"), tags(&[]));
        reader.set_image(&second, vec![1]);

        // One worker so both files are seen by the same directory visit
        let mut opts = options(dir.path());
        opts.workers = 1;
        let (_, files) = run(opts, reader).await;
        assert_eq!(files[0].cover, Some(CoverSource::Embedded(second.clone())));
        assert_eq!(files[1].cover, Some(CoverSource::Embedded(second)));
    }

    #[tokio::test]
    async fn test_walk_reads_lyrics_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(dir.path().join("01.mp3"), tags(&[("LYRICS", &["from tags"])]));
        reader.add(dir.path().join("02.mp3"), tags(&[("LYRICS", &["kept"])]));
        std::fs::write(dir.path().join("01.lrc"), "[00:00.50]from file").unwrap();

        let (_, files) = run(options(dir.path()), reader).await;
        assert_eq!(files[0].lyrics.as_deref(), Some("[00:00.50]from file"));
        assert_eq!(files[1].lyrics.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_walk_collects_artist_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let reader = Arc::new(FakeTagReader::default());
        reader.add(root.join("Bob/First/01.mp3"), tags(&[]));
        std::fs::create_dir_all(root.join("Other/Bob")).unwrap();
        std::fs::write(root.join("Bob/artist.jpg"), b"jpg").unwrap();
        std::fs::write(root.join("Other/Bob/artist.png"), b"png").unwrap();
        std::fs::write(root.join("Bob/First/cover.jpg"), b"jpg").unwrap();
        std::fs::write(root.join("artist.jpg"), b"root").unwrap();

        let (output, _) = run(options(root), reader).await;
        let names: Vec<_> = output.artist_images.keys().cloned().collect();
        assert_eq!(names, vec!["Bob".to_string()]);
        assert_eq!(output.artist_images["Bob"].path, root.join("Bob/artist.jpg"));
    }

    #[tokio::test]
    async fn test_walk_embedded_priority() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        let song = reader.add(dir.path().join("01.mp3"), tags(&[]));
        reader.set_image(&song, vec![1]);
        std::fs::write(dir.path().join("cover.jpg"), b"jpg").unwrap();

        let mut opts = options(dir.path());
        opts.cover_priority = CoverPriority::new(&["front", "embedded", "cover"]);
        let (_, files) = run(opts, reader).await;
        assert_eq!(files[0].cover, Some(CoverSource::Embedded(song)));
    }

    #[tokio::test]
    async fn test_walk_unreadable_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = walk(
            options(&dir.path().join("missing")),
            Arc::new(FakeTagReader::default()),
            tx,
            CancellationToken::new(),
            Arc::new(AtomicU64::new(0)),
        )
        .await;
        assert!(matches!(result, Err(ScanError::RootUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_walk_stops_when_queue_closes() {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(FakeTagReader::default());
        for i in 0..20 {
            reader.add(dir.path().join(format!("{i:02}.mp3")), tags(&[]));
        }
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let output = walk(
            options(dir.path()),
            reader,
            tx,
            CancellationToken::new(),
            Arc::new(AtomicU64::new(0)),
        )
        .await
        .unwrap();
        assert_eq!(output.stats.media_files, 0);
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("a.mp3")));
        assert!(is_audio_file(Path::new("a.FLAC")));
        assert!(!is_audio_file(Path::new("a.jpg")));
        assert!(!is_audio_file(Path::new("a")));
    }
}
