//! Render album and song covers into the cover directory.
//!
//! Each job names an entity and where its cover comes from. Covers are only
//! rewritten when the source is newer than the rendered file and its artwork
//! actually differs. Every rewrite or removal drops the entity's cached
//! thumbnails.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cover::{CoverError, CoverSource, ObjectCache, render};
use crate::metadata::TagReader;
use crate::model::{ALBUM_ID_PREFIX, ARTIST_ID_PREFIX, SONG_ID_PREFIX};

/// Cover work for one album, artist or album-less song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverJob {
    pub entity_id: String,
    /// `None` removes the rendered cover
    pub source: Option<CoverSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverOutcome {
    Written,
    Unchanged,
    Removed,
    /// Nothing to write and nothing to remove
    Absent,
}

/// Totals of one cover pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverReport {
    pub written: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Every entity that received a job
    pub associated: HashSet<String>,
}

type EncodedImage = Option<Arc<[u8]>>;

/// Shared state of the cover workers.
pub struct CoverContext {
    pub reader: Arc<dyn TagReader>,
    pub cover_dir: PathBuf,
    pub thumbnails: Option<Arc<ObjectCache>>,
    /// Embedded artwork encoded as JPEG, once per source file
    embedded: Mutex<HashMap<PathBuf, Arc<OnceLock<EncodedImage>>>>,
}

impl CoverContext {
    pub fn new(
        reader: Arc<dyn TagReader>,
        cover_dir: PathBuf,
        thumbnails: Option<Arc<ObjectCache>>,
    ) -> Self {
        Self {
            reader,
            cover_dir,
            thumbnails,
            embedded: Mutex::new(HashMap::new()),
        }
    }

    fn embedded_jpeg(&self, path: &Path) -> EncodedImage {
        let cell = Arc::clone(self.embedded.lock().entry(path.to_path_buf()).or_default());
        cell.get_or_init(|| {
            let image = self.reader.open(path).ok()?.read_embedded_image()?;
            match render::encode_jpeg(&image.data) {
                Ok(jpeg) => Some(jpeg.into()),
                Err(e) => {
                    warn!(target: "scanner::covers", path = %path.display(), error = %e, "Failed to decode embedded artwork");
                    None
                }
            }
        })
        .clone()
    }

    fn invalidate_thumbnails(&self, entity_id: &str) {
        if let Some(cache) = &self.thumbnails {
            cache.invalidate(entity_id);
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Bring the rendered cover of `job.entity_id` in line with its source.
pub fn assign_cover(ctx: &CoverContext, job: &CoverJob) -> Result<CoverOutcome, CoverError> {
    let dest = ctx.cover_dir.join(&job.entity_id);
    let Some(source) = &job.source else {
        return remove(ctx, &job.entity_id, &dest);
    };

    // A missing source fails here rather than later in the copy
    let source_modified = fs::metadata(source.path())?.modified()?;
    if modified(&dest).is_some_and(|rendered| rendered >= source_modified) {
        return Ok(CoverOutcome::Unchanged);
    }

    match source {
        CoverSource::Image(path) => render::copy_image(path, &dest)?,
        CoverSource::Embedded(path) => match ctx.embedded_jpeg(path) {
            // Retagging rewrites the audio file but not its artwork
            Some(jpeg) if fs::read(&dest).is_ok_and(|rendered| rendered[..] == jpeg[..]) => {
                render::touch(&dest)?;
                return Ok(CoverOutcome::Unchanged);
            }
            Some(jpeg) => render::write_bytes(&jpeg, &dest)?,
            None => return remove(ctx, &job.entity_id, &dest),
        },
    }
    ctx.invalidate_thumbnails(&job.entity_id);
    debug!(target: "scanner::covers", id = %job.entity_id, source = %source.path().display(), "Wrote cover");
    Ok(CoverOutcome::Written)
}

fn remove(ctx: &CoverContext, entity_id: &str, dest: &Path) -> Result<CoverOutcome, CoverError> {
    if render::remove(dest)? {
        ctx.invalidate_thumbnails(entity_id);
        Ok(CoverOutcome::Removed)
    } else {
        Ok(CoverOutcome::Absent)
    }
}

/// Bounded pool running [`assign_cover`] on blocking threads.
pub struct CoverPool {
    pub workers: usize,
    pub context: CoverContext,
    pub cancel: CancellationToken,
}

impl CoverPool {
    /// Start the pool. It runs until every sender of the returned channel is dropped.
    pub fn spawn(self, capacity: usize) -> Result<(mpsc::Sender<CoverJob>, JoinHandle<CoverReport>), CoverError> {
        fs::create_dir_all(&self.context.cover_dir)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Ok((tx, tokio::spawn(self.run(rx))))
    }

    async fn run(self, mut rx: mpsc::Receiver<CoverJob>) -> CoverReport {
        let permits = Arc::new(Semaphore::new(self.workers.max(1)));
        let context = Arc::new(self.context);
        let mut jobs = JoinSet::new();
        let mut report = CoverReport::default();

        while let Some(job) = rx.recv().await {
            report.associated.insert(job.entity_id.clone());
            if self.cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let context = Arc::clone(&context);
            jobs.spawn_blocking(move || {
                let _permit = permit;
                let result = assign_cover(&context, &job);
                (job.entity_id, result)
            });
            while let Some(done) = jobs.try_join_next() {
                report.record(done);
            }
        }
        while let Some(done) = jobs.join_next().await {
            report.record(done);
        }
        report
    }
}

impl CoverReport {
    fn record(
        &mut self,
        done: Result<(String, Result<CoverOutcome, CoverError>), tokio::task::JoinError>,
    ) {
        match done {
            Ok((_, Ok(CoverOutcome::Written))) => self.written += 1,
            Ok((_, Ok(CoverOutcome::Unchanged))) => self.unchanged += 1,
            Ok((_, Ok(CoverOutcome::Removed))) => self.removed += 1,
            Ok((_, Ok(CoverOutcome::Absent))) => {}
            Ok((id, Err(e))) => {
                warn!(target: "scanner::covers", id = %id, error = %e, "Failed to assign cover");
                self.failed += 1;
            }
            Err(e) => {
                error!(target: "scanner::covers", error = %e, "Cover task failed");
                self.failed += 1;
            }
        }
    }
}

/// Delete rendered covers of entities that received no job.
///
/// Only files named like album, artist or song ids are considered.
pub fn prune_covers(cover_dir: &Path, keep: &HashSet<String>) -> usize {
    let Ok(entries) = fs::read_dir(cover_dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let is_entity = [ALBUM_ID_PREFIX, ARTIST_ID_PREFIX, SONG_ID_PREFIX]
            .iter()
            .any(|prefix| name.starts_with(prefix));
        if !is_entity || keep.contains(&name) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(target: "scanner::covers", path = %entry.path().display(), error = %e, "Failed to prune cover");
            }
        }
    }
    removed
}
