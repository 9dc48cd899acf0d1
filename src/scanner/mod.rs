//! Library scanner.
//!
//! A scan walks the media directory, resolves every audio file into song,
//! album and artist rows, and removes rows for files that are gone. All of it
//! happens inside one transaction: the library either matches the directory
//! tree afterwards or is left exactly as it was.
//!
//! ```text
//! walk workers ──► song queue ──► SongConsumer ──► transaction
//!                                    │     │
//!                                    │     └──► StampPool (ids, transcodes)
//!                                    └────────► CoverPool (rendered covers)
//! ```
//!
//! Shutdown runs in order: the walk returns once its workers have dropped
//! the queue senders, the consumer drains the queue and drops the pool
//! senders, the pools finish their jobs, and only then are orphaned rows
//! reaped and the transaction committed.

pub mod albums;
pub mod artists;
pub mod covers;
pub mod extract;
pub mod lyrics;
pub mod queue;
pub mod reaper;
pub mod stamp;
pub mod walk;


use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cover::{CoverError, CoverPriority, ObjectCache};
use crate::db;
use crate::metadata::TagReader;
use crate::model::from_micros;
use covers::{CoverContext, CoverPool, CoverReport, prune_covers};
use queue::{ConsumerSettings, QueueStats, SongConsumer};
use reaper::{ReapStats, reap};
use stamp::{StampPool, StampReport};
use walk::{WalkOptions, WalkStats, walk};

/// Errors that end a scan. Every one of them rolls the scan back.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("A scan is already running")]
    AlreadyScanning,

    #[error("Scan was cancelled")]
    Cancelled,

    #[error("Media directory {path} is unreadable: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cover directory unusable: {0}")]
    Cover(#[from] CoverError),

    #[error("Scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Creates and updates of one entity kind during a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub created: u64,
    pub updated: u64,
}

/// How the scanner reaches the library and how hard it works.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    pub media_dir: PathBuf,
    pub scan_hidden: bool,
    pub cover_priority: CoverPriority,
    /// Image stems that mark an artist image in a directory named after the artist
    pub artist_image_priority: CoverPriority,
    /// Where rendered covers are written, one file per entity id
    pub cover_dir: PathBuf,
    pub walk_workers: usize,
    pub cover_workers: usize,
    pub stamp_workers: usize,
    pub batch_size: usize,
}

impl ScannerOptions {
    pub fn new(media_dir: impl Into<PathBuf>, cover_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            scan_hidden: false,
            cover_priority: CoverPriority::default(),
            artist_image_priority: CoverPriority::new(&["artist"]),
            cover_dir: cover_dir.into(),
            walk_workers: 10,
            cover_workers: 10,
            stamp_workers: 10,
            batch_size: 100,
        }
    }
}

/// What a successful scan did.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub full: bool,
    pub walk: WalkStats,
    pub songs: QueueStats,
    pub albums: EntityStats,
    pub artists: EntityStats,
    pub reaped: ReapStats,
    pub covers: CoverReport,
    /// Artists that got an image job
    pub artist_images: usize,
    pub stamps: StampReport,
    pub covers_pruned: usize,
    pub elapsed: Duration,
}

/// Runs scans of one library, one at a time.
pub struct Scanner {
    pool: SqlitePool,
    options: ScannerOptions,
    reader: Arc<dyn TagReader>,
    thumbnails: Option<Arc<ObjectCache>>,
    transcodes: Option<Arc<ObjectCache>>,
    lock: tokio::sync::Mutex<()>,
    scanning: AtomicBool,
    count: Arc<AtomicU64>,
    cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl Scanner {
    pub fn new(pool: SqlitePool, options: ScannerOptions, reader: Arc<dyn TagReader>) -> Self {
        Self {
            pool,
            options,
            reader,
            thumbnails: None,
            transcodes: None,
            lock: tokio::sync::Mutex::new(()),
            scanning: AtomicBool::new(false),
            count: Arc::new(AtomicU64::new(0)),
            cancel: parking_lot::Mutex::new(None),
        }
    }

    /// Invalidate rendered thumbnails in `cache` when covers change.
    pub fn with_thumbnails(mut self, cache: Arc<ObjectCache>) -> Self {
        self.thumbnails = Some(cache);
        self
    }

    /// Drop cached transcodes in `cache` when files change.
    pub fn with_transcodes(mut self, cache: Arc<ObjectCache>) -> Self {
        self.transcodes = Some(cache);
        self
    }

    /// Audio files seen by the running scan, or by the last successful one.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Ask the running scan, if any, to stop and roll back.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            token.cancel();
        }
    }

    /// Bring the library in line with the media directory.
    ///
    /// A full scan treats every file as changed and clears the thumbnail
    /// cache first. Fails with [`ScanError::AlreadyScanning`] instead of
    /// waiting when another scan holds the scanner.
    pub async fn scan(&self, full: bool) -> Result<ScanSummary, ScanError> {
        let Ok(_guard) = self.lock.try_lock() else {
            return Err(ScanError::AlreadyScanning);
        };
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        self.scanning.store(true, Ordering::Release);
        let previous_count = self.count.swap(0, Ordering::Relaxed);
        info!(target: "scanner", root = %self.options.media_dir.display(), full, "Scan started");

        let result = self.run(full, &cancel).await;

        if let Err(e) = &result {
            // Stop whatever is still running before the transaction goes away
            cancel.cancel();
            self.count.store(previous_count, Ordering::Relaxed);
            match e {
                ScanError::Cancelled => warn!(target: "scanner", "Scan cancelled, changes rolled back"),
                e => error!(target: "scanner", error = %e, "Scan failed, changes rolled back"),
            }
        }
        *self.cancel.lock() = None;
        self.scanning.store(false, Ordering::Release);
        result
    }

    async fn run(&self, full: bool, cancel: &CancellationToken) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let instance_id = db::system::instance_id(&mut tx).await?;
        let stored_last_scan = db::system::last_scan(&mut tx).await?.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let first_scan = db::songs::count(&mut tx).await? == 0;
        let scan_start = scan_start(Utc::now(), stored_last_scan);
        let last_scan = if full || first_scan {
            DateTime::<Utc>::UNIX_EPOCH
        } else {
            stored_last_scan
        };

        if full {
            if let Some(thumbnails) = &self.thumbnails {
                match thumbnails.clear() {
                    Ok(cleared) => info!(target: "scanner", cleared, "Cleared thumbnail cache"),
                    Err(e) => warn!(target: "scanner", error = %e, "Failed to clear thumbnail cache"),
                }
            }
        }

        let id_tag = extract::id_tag_key(&instance_id);
        let capacity = self.options.batch_size.max(1) * 2;

        let cover_pool = CoverPool {
            workers: self.options.cover_workers,
            context: CoverContext::new(
                Arc::clone(&self.reader),
                self.options.cover_dir.clone(),
                self.thumbnails.clone(),
            ),
            cancel: cancel.clone(),
        };
        let (cover_tx, covers) = cover_pool.spawn(capacity)?;
        let stamp_pool = StampPool {
            workers: self.options.stamp_workers,
            reader: Arc::clone(&self.reader),
            id_tag: id_tag.clone(),
            transcodes: self.transcodes.clone(),
            cancel: cancel.clone(),
        };
        let (stamp_tx, stamps) = stamp_pool.spawn(capacity);

        let settings = ConsumerSettings {
            scan_start,
            last_scan,
            first_scan,
            batch_size: self.options.batch_size,
        };
        let consumer = SongConsumer::new(tx, settings, cover_tx, stamp_tx, cancel.clone()).await?;

        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let consuming = tokio::spawn(consumer.run(queue_rx));

        let walk_options = WalkOptions {
            root: self.options.media_dir.clone(),
            workers: self.options.walk_workers,
            scan_hidden: self.options.scan_hidden,
            cover_priority: self.options.cover_priority.clone(),
            artist_image_priority: self.options.artist_image_priority.clone(),
            id_tag,
        };
        let walked = walk(
            walk_options,
            Arc::clone(&self.reader),
            queue_tx,
            cancel.clone(),
            Arc::clone(&self.count),
        )
        .await;
        if walked.is_err() {
            cancel.cancel();
        }
        // The queue is closed now, so the consumer finishes on its own
        let consumed = consuming.await;
        let walked = walked?;
        let consumer = consumed??;
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let artist_images = consumer.queue_artist_images(&walked.artist_images).await;
        let output = consumer.finish().await?;
        let covers = covers.await?;
        let stamps = stamps.await?;
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let mut tx = output.tx;
        let reaped = reap(&mut tx, scan_start).await?;
        // Stamping touched files, so the watermark must come after the pools
        db::system::set_last_scan(&mut tx, Utc::now()).await?;
        tx.commit().await?;

        let covers_pruned = prune_covers(&self.options.cover_dir, &covers.associated);
        let summary = ScanSummary {
            full,
            walk: walked.stats,
            songs: output.songs,
            albums: output.albums,
            artists: output.artists,
            reaped,
            covers,
            artist_images,
            stamps,
            covers_pruned,
            elapsed: started.elapsed(),
        };
        info!(
            target: "scanner",
            files = summary.walk.media_files,
            songs_created = summary.songs.songs_created,
            songs_updated = summary.songs.songs_updated,
            albums_created = summary.albums.created,
            artists_created = summary.artists.created,
            songs_deleted = summary.reaped.songs,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Scan finished"
        );
        Ok(summary)
    }
}

/// Watermark of a scan starting at `now`, strictly after the previous one.
fn scan_start(now: DateTime<Utc>, last_scan: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(now.timestamp_micros().max(last_scan.timestamp_micros() + 1))
}
