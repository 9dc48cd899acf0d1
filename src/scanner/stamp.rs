//! Write song ids back into the audio files.
//!
//! A stamped id lets the next scan find a moved or retagged file without
//! guessing from its content. Stamping is best-effort: failures are logged
//! and the song is matched by content again next time.
//!
//! The same pool also drops transcodes of files that changed since the
//! previous scan, since that work is per song and off the consumer's path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cover::ObjectCache;
use crate::metadata::{TagMap, TagReader, first_value};

/// Whether a song's id is known to be in its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTagState {
    /// The file carries no usable id
    Unknown,
    /// A stamp job has been queued
    Pending,
    /// The file already carries this song's id
    Stamped,
}

/// Per-song work for the stamp pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampJob {
    pub song_id: String,
    pub path: PathBuf,
    /// Write `song_id` into the file
    pub write_id: bool,
    /// Drop every cached transcode of the song
    pub invalidate_transcodes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampOutcome {
    Written,
    AlreadyStamped,
    Failed,
}

/// Totals of one stamp pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StampReport {
    pub written: u64,
    pub already_stamped: u64,
    pub failed: u64,
    pub transcodes_invalidated: u64,
    pub skipped: u64,
}

/// Write `song_id` into the `id_tag` tag of the file at `path`.
///
/// Does nothing when the tag already holds `song_id`, so retrying a job is
/// harmless.
pub fn stamp_file(reader: &dyn TagReader, path: &Path, id_tag: &str, song_id: &str) -> StampOutcome {
    let mut file = match reader.open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(target: "scanner::stamp", path = %path.display(), error = %e, "Failed to open file for id stamping");
            return StampOutcome::Failed;
        }
    };
    if first_value(&file.read_tags(), &[id_tag]) == Some(song_id) {
        return StampOutcome::AlreadyStamped;
    }

    let tags = TagMap::from([(id_tag.to_string(), vec![song_id.to_string()])]);
    if file.write_tags(&tags) {
        debug!(target: "scanner::stamp", path = %path.display(), song_id, "Stamped song id");
        StampOutcome::Written
    } else {
        warn!(target: "scanner::stamp", path = %path.display(), "Failed to write song id tag");
        StampOutcome::Failed
    }
}

/// Bounded pool running [`StampJob`]s on blocking threads.
pub struct StampPool {
    pub workers: usize,
    pub reader: Arc<dyn TagReader>,
    pub id_tag: String,
    pub transcodes: Option<Arc<ObjectCache>>,
    pub cancel: CancellationToken,
}

impl StampPool {
    /// Start the pool. It runs until every sender of the returned channel is dropped.
    pub fn spawn(self, capacity: usize) -> (mpsc::Sender<StampJob>, JoinHandle<StampReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, tokio::spawn(self.run(rx)))
    }

    async fn run(self, mut rx: mpsc::Receiver<StampJob>) -> StampReport {
        let permits = Arc::new(Semaphore::new(self.workers.max(1)));
        let shared = Arc::new(self);
        let mut jobs = JoinSet::new();
        let mut report = StampReport::default();

        while let Some(job) = rx.recv().await {
            if shared.cancel.is_cancelled() {
                // Keep draining so the consumer never blocks on a full channel
                report.skipped += 1;
                continue;
            }
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let shared = Arc::clone(&shared);
            jobs.spawn_blocking(move || {
                let _permit = permit;
                shared.process(&job)
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

    fn process(&self, job: &StampJob) -> (Option<StampOutcome>, u64) {
        let outcome = job
            .write_id
            .then(|| stamp_file(self.reader.as_ref(), &job.path, &self.id_tag, &job.song_id));
        let invalidated = match (&self.transcodes, job.invalidate_transcodes) {
            (Some(cache), true) => cache.invalidate(&job.song_id) as u64,
            _ => 0,
        };
        (outcome, invalidated)
    }
}

impl StampReport {
    fn record(&mut self, done: Result<(Option<StampOutcome>, u64), tokio::task::JoinError>) {
        match done {
            Ok((outcome, invalidated)) => {
                match outcome {
                    Some(StampOutcome::Written) => self.written += 1,
                    Some(StampOutcome::AlreadyStamped) => self.already_stamped += 1,
                    Some(StampOutcome::Failed) => self.failed += 1,
                    None => {}
                }
                self.transcodes_invalidated += invalidated;
            }
            Err(e) => {
                error!(target: "scanner::stamp", error = %e, "Stamp task failed");
                self.failed += 1;
            }
        }
    }
}
