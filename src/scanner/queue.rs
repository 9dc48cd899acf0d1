//! The single consumer of the song queue.
//!
//! Walk workers push [`MediaFile`]s into a bounded channel; this consumer
//! drains it in fixed-size batches. It owns the scan transaction and both
//! resolver maps, so identity resolution needs no locking. Per batch it:
//!
//! 1. resolves artists and the album of every file,
//! 2. attaches each file to a song id: the stamped one, else one found by
//!    content, else a fresh one,
//! 3. updates known songs and creates the rest (updates whose row vanished
//!    become creates),
//! 4. rewrites artist and genre links of new and changed songs,
//! 5. queues id stamping and cover work.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use sqlx::{Sqlite, Transaction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::albums::{AlbumMap, AlbumParams};
use super::artists::ArtistMap;
use super::covers::CoverJob;
use super::extract::MediaFile;
use super::stamp::{IdTagState, StampJob};
use super::walk::ArtistImages;
use super::{EntityStats, ScanError};
use crate::cover::CoverSource;
use crate::db;
use crate::db::songs::{SongArtistConnection, SongGenreConnection};
use crate::model::{SONG_ID_PREFIX, Song, SongLookup, generate_id};

/// Fixed inputs of one consume phase.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Watermark written to every row this scan confirms
    pub scan_start: DateTime<Utc>,
    /// Files modified after this get their links rewritten
    pub last_scan: DateTime<Utc>,
    /// The library is empty, so every file is new
    pub first_scan: bool,
    pub batch_size: usize,
}

/// Song totals of one consume phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub songs_created: u64,
    pub songs_updated: u64,
    /// Songs whose artist and genre links were rewritten
    pub links_rewritten: u64,
    pub discarded: u64,
}

/// Everything the consumer hands back once the queue is drained.
pub struct ConsumerOutput {
    pub tx: Transaction<'static, Sqlite>,
    pub songs: QueueStats,
    pub albums: EntityStats,
    pub artists: EntityStats,
}

/// A file on its way to becoming a song row.
#[derive(Debug)]
struct Staged {
    song: Song,
    stamped_id: Option<String>,
    id_tag: IdTagState,
    artist_ids: Vec<String>,
    genres: Vec<String>,
    /// Cover hint for songs without an album
    cover: Option<CoverSource>,
    created: bool,
}

pub struct SongConsumer {
    tx: Transaction<'static, Sqlite>,
    artists: ArtistMap,
    albums: AlbumMap,
    covers: mpsc::Sender<CoverJob>,
    stamps: mpsc::Sender<StampJob>,
    settings: ConsumerSettings,
    cancel: CancellationToken,
    /// Song ids already attached to a file this scan
    claimed: HashSet<String>,
    stats: QueueStats,
}

impl SongConsumer {
    /// Seed both resolver maps from `tx`.
    pub async fn new(
        mut tx: Transaction<'static, Sqlite>,
        settings: ConsumerSettings,
        covers: mpsc::Sender<CoverJob>,
        stamps: mpsc::Sender<StampJob>,
        cancel: CancellationToken,
    ) -> Result<Self, ScanError> {
        let artists = ArtistMap::load(&mut tx).await?;
        let albums = AlbumMap::load(&mut tx).await?;
        Ok(Self {
            tx,
            artists,
            albums,
            covers,
            stamps,
            settings,
            cancel,
            claimed: HashSet::new(),
            stats: QueueStats::default(),
        })
    }

    /// Drain `rx` until every producer has dropped its sender.
    ///
    /// After cancellation the remaining files are received and discarded so
    /// producers never block on a full queue. A failed batch cancels the scan
    /// at once, so the walk and both pools stop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<MediaFile>) -> Result<Self, ScanError> {
        match self.drain(&mut rx).await {
            Ok(()) => Ok(self),
            Err(e) => {
                self.cancel.cancel();
                Err(e)
            }
        }
    }

    async fn drain(&mut self, rx: &mut mpsc::Receiver<MediaFile>) -> Result<(), ScanError> {
        let batch_size = self.settings.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        while let Some(file) = rx.recv().await {
            if self.cancel.is_cancelled() {
                self.stats.discarded += 1;
                continue;
            }
            batch.push(file);
            if batch.len() >= batch_size {
                self.process_batch(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() && !self.cancel.is_cancelled() {
            self.process_batch(batch).await?;
        }
        Ok(())
    }

    /// Queue a cover job for every artist seen this scan that has an image
    /// in a directory of the same name. Returns the number of jobs sent.
    pub async fn queue_artist_images(&self, images: &ArtistImages) -> usize {
        let mut queued = 0;
        for (name, image) in images {
            for artist_id in self.artists.seen_named(name) {
                send(
                    &self.covers,
                    CoverJob {
                        entity_id: artist_id,
                        source: Some(CoverSource::Image(image.path.clone())),
                    },
                )
                .await;
                queued += 1;
            }
        }
        debug!(target: "scanner::queue", queued, "Queued artist images");
        queued
    }

    /// Write album-artist links, touch unchanged albums and artists, and
    /// release the transaction. Dropping `self` closes the pool channels.
    pub async fn finish(mut self) -> Result<ConsumerOutput, ScanError> {
        let now = self.settings.scan_start;
        let relinked = self.albums.write_artist_connections(&mut self.tx).await?;
        let albums = self.albums.touch_matched(&mut self.tx, now).await?;
        let artists = self.artists.touch_matched(&mut self.tx, now).await?;
        debug!(target: "scanner::queue", relinked, albums, artists, "Touched unchanged albums and artists");

        Ok(ConsumerOutput {
            tx: self.tx,
            songs: self.stats,
            albums: self.albums.stats,
            artists: self.artists.stats,
        })
    }

    /// Resolve, store and link one batch of files.
    pub async fn process_batch(&mut self, files: Vec<MediaFile>) -> Result<(), ScanError> {
        let now = self.settings.scan_start;
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            staged.push(self.stage(file).await?);
        }

        // Stamped ids first; a second file carrying an already claimed id
        // is treated as unidentified
        let mut unresolved = Vec::new();
        let mut update = Vec::new();
        for mut s in staged {
            match s.stamped_id.take() {
                Some(id) if self.claimed.insert(id.clone()) => {
                    s.song.id = id;
                    s.id_tag = IdTagState::Stamped;
                    update.push(s);
                }
                _ => unresolved.push(s),
            }
        }

        let mut create = Vec::new();
        if self.settings.first_scan {
            create = unresolved;
        } else if !unresolved.is_empty() {
            let songs: Vec<&Song> = unresolved.iter().map(|s| &s.song).collect();
            let matches = Self::resolve_by_content(&mut self.tx, &songs, &mut self.claimed).await?;
            for (mut s, found) in unresolved.into_iter().zip(matches) {
                match found {
                    Some(id) => {
                        s.song.id = id;
                        update.push(s);
                    }
                    None => create.push(s),
                }
            }
        }

        if !update.is_empty() {
            let rows: Vec<Song> = update.iter().map(|s| s.song.clone()).collect();
            let updated = db::songs::try_update_all(&mut self.tx, &rows, now).await?;
            if updated < rows.len() as u64 {
                let ids: Vec<String> = rows.into_iter().map(|s| s.id).collect();
                let missing = db::songs::find_non_existent_ids(&mut self.tx, &ids).await?;
                debug!(target: "scanner::queue", count = missing.len(), "Songs vanished before update, creating instead");
                let (gone, kept): (Vec<_>, Vec<_>) =
                    update.into_iter().partition(|s| missing.contains(&s.song.id));
                update = kept;
                create.extend(gone);
            }
        }

        for s in &mut create {
            if s.song.id.is_empty() {
                s.song.id = generate_id(SONG_ID_PREFIX);
                self.claimed.insert(s.song.id.clone());
            }
            s.created = true;
        }
        if !create.is_empty() {
            let rows: Vec<Song> = create.iter().map(|s| s.song.clone()).collect();
            db::songs::create_all(&mut self.tx, &rows, now).await?;
        }
        self.stats.songs_updated += update.len() as u64;
        self.stats.songs_created += create.len() as u64;

        let mut songs = update;
        songs.extend(create);
        self.rewrite_links(&songs).await?;
        self.dispatch(&mut songs).await;
        Ok(())
    }

    async fn stage(&mut self, file: MediaFile) -> Result<Staged, ScanError> {
        let now = self.settings.scan_start;
        let conn: &mut SqliteConnection = &mut self.tx;

        let artist_ids = self
            .artists
            .find_or_create_all(conn, &file.artists, &file.artist_mbids, now)
            .await?;
        let album_artist_ids = self
            .artists
            .find_or_create_all(conn, &file.album_artists, &file.album_artist_mbids, now)
            .await?;

        let album_id = match &file.album_name {
            Some(name) => {
                let params = AlbumParams {
                    year: file.year,
                    record_labels: file.record_labels.clone(),
                    release_types: file.release_types.clone(),
                    is_compilation: file.is_compilation,
                    replay_gain: file.album_gain,
                    replay_gain_peak: file.album_peak,
                    release_mbid: file.release_mbid.clone(),
                    release_group_mbid: file.release_group_mbid.clone(),
                    artist_ids: album_artist_ids,
                    artist_names: file.album_artists.clone(),
                };
                let album = self.albums.find_or_create(conn, name, &params, now).await?;
                self.albums
                    .update_disc_title(conn, &album.id, file.disc, file.disc_title.as_deref(), now)
                    .await?;
                if album.first_seen {
                    send(
                        &self.covers,
                        CoverJob {
                            entity_id: album.id.clone(),
                            source: file.cover.clone(),
                        },
                    )
                    .await;
                }
                Some(album.id)
            }
            None => None,
        };

        let cover = if album_id.is_none() { file.cover.clone() } else { None };
        let song = Song {
            id: String::new(),
            path: file.path.to_string_lossy().into_owned(),
            album_id,
            album_name: file.album_name,
            title: file.title,
            track: file.track,
            disc: file.disc,
            year: file.year,
            size: i64::try_from(file.size).unwrap_or(i64::MAX),
            content_type: file.content_type,
            duration_ms: i64::try_from(file.properties.duration.as_millis()).unwrap_or(i64::MAX),
            bit_rate: clamp(file.properties.bit_rate),
            sampling_rate: clamp(file.properties.sample_rate),
            channel_count: clamp(file.properties.channels),
            bpm: file.bpm,
            mbid: file.mbid,
            release_mbid: file.release_mbid,
            release_group_mbid: file.release_group_mbid,
            replay_gain: file.track_gain,
            replay_gain_peak: file.track_peak,
            lyrics: file.lyrics,
            artist_names: Json(file.artists),
            modified: file.modified.timestamp_micros(),
        };

        Ok(Staged {
            song,
            stamped_id: file.stamped_id,
            id_tag: IdTagState::Unknown,
            artist_ids,
            genres: file.genres,
            cover,
            created: false,
        })
    }

    /// Match unidentified songs against stored rows, in order.
    ///
    /// A stored row at the same path wins. Otherwise a row with the same
    /// recording MBID wins if it has the same release MBID, or, lacking a
    /// release MBID, the same release-group MBID. Rows in `claimed` are
    /// skipped and every match is added to it.
    pub async fn resolve_by_content(
        conn: &mut SqliteConnection,
        songs: &[&Song],
        claimed: &mut HashSet<String>,
    ) -> sqlx::Result<Vec<Option<String>>> {
        let paths: Vec<String> = songs.iter().map(|s| s.path.clone()).collect();
        let mbids: Vec<String> = songs.iter().filter_map(|s| s.mbid.clone()).collect();
        let known = db::songs::find_all_by_path_or_mbid(conn, &paths, &mbids).await?;

        let mut matches = Vec::with_capacity(songs.len());
        for song in songs {
            let found = match_content(song, &known, claimed).map(|row| row.id.clone());
            if let Some(id) = &found {
                claimed.insert(id.clone());
            }
            matches.push(found);
        }
        Ok(matches)
    }

    async fn rewrite_links(&mut self, songs: &[Staged]) -> Result<(), ScanError> {
        let last_scan = self.settings.last_scan.timestamp_micros();
        let changed: Vec<&Staged> = songs
            .iter()
            .filter(|s| s.created || s.song.modified > last_scan)
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = changed.iter().map(|s| s.song.id.clone()).collect();

        let artist_links: Vec<SongArtistConnection> = changed
            .iter()
            .flat_map(|s| {
                s.artist_ids
                    .iter()
                    .enumerate()
                    .map(move |(i, artist_id)| SongArtistConnection {
                        song_id: s.song.id.clone(),
                        artist_id: artist_id.clone(),
                        index: i as i64,
                    })
            })
            .collect();
        db::songs::delete_artist_connections(&mut self.tx, &ids).await?;
        db::songs::create_artist_connections(&mut self.tx, &artist_links).await?;

        let genres: BTreeSet<&String> = changed.iter().flat_map(|s| &s.genres).collect();
        let genres: Vec<String> = genres.into_iter().cloned().collect();
        db::genres::create_if_not_exists(&mut self.tx, &genres).await?;
        let genre_links: Vec<SongGenreConnection> = changed
            .iter()
            .flat_map(|s| {
                s.genres.iter().map(move |genre| SongGenreConnection {
                    song_id: s.song.id.clone(),
                    genre: genre.clone(),
                })
            })
            .collect();
        db::songs::delete_genre_connections(&mut self.tx, &ids).await?;
        db::songs::create_genre_connections(&mut self.tx, &genre_links).await?;

        self.stats.links_rewritten += changed.len() as u64;
        Ok(())
    }

    async fn dispatch(&self, songs: &mut [Staged]) {
        let last_scan = self.settings.last_scan.timestamp_micros();
        for s in songs {
            let write_id = s.id_tag != IdTagState::Stamped;
            let invalidate_transcodes = !s.created && s.song.modified > last_scan;
            if write_id || invalidate_transcodes {
                if write_id {
                    s.id_tag = IdTagState::Pending;
                }
                send(
                    &self.stamps,
                    StampJob {
                        song_id: s.song.id.clone(),
                        path: PathBuf::from(&s.song.path),
                        write_id,
                        invalidate_transcodes,
                    },
                )
                .await;
            }
            if s.song.album_id.is_none() {
                send(
                    &self.covers,
                    CoverJob {
                        entity_id: s.song.id.clone(),
                        source: s.cover.take(),
                    },
                )
                .await;
            }
        }
    }
}

fn match_content<'a>(
    song: &Song,
    known: &'a [SongLookup],
    claimed: &HashSet<String>,
) -> Option<&'a SongLookup> {
    let free = move || known.iter().filter(move |row| !claimed.contains(&row.id));
    if let Some(row) = free().find(|row| row.path == song.path) {
        return Some(row);
    }
    let mbid = song.mbid.as_deref()?;
    let same_recording = move || free().filter(move |row| row.mbid.as_deref() == Some(mbid));
    if let Some(release) = song.release_mbid.as_deref() {
        let found = same_recording().find(|row| row.release_mbid.as_deref() == Some(release));
        if found.is_some() {
            return found;
        }
    }
    let group = song.release_group_mbid.as_deref()?;
    same_recording()
        .find(|row| row.release_mbid.is_none() && row.release_group_mbid.as_deref() == Some(group))
}

fn clamp(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Side-effect channels are best-effort: a closed pool is logged, not fatal.
async fn send<T>(channel: &mpsc::Sender<T>, job: T) {
    if channel.send(job).await.is_err() {
        warn!(target: "scanner::queue", "Worker pool is gone, dropping job");
    }
}
