//! In-memory album identity map.
//!
//! Album names are ambiguous: reissues, deluxe editions and unrelated
//! records share titles. Candidates under one name are told apart by the
//! first rule both sides have data for, in this order:
//!
//! 1. release MBID
//! 2. release-group MBID
//! 3. the album-artist set, ignoring order
//! 4. year
//!
//! The chosen rule decides that candidate alone. When no rule applies the
//! candidate matches, so untagged albums with the same name collapse.
//!
//! Candidates for a name are loaded from the database the first time the
//! name is seen, best artist overlap first. The map is owned by the song
//! consumer and rebuilt every scan.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use tracing::debug;

use super::EntityStats;
use crate::db;
use crate::db::albums::AlbumArtistConnection;
use crate::model::{ALBUM_ID_PREFIX, Album, generate_id};

/// Album-level metadata carried by one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumParams {
    pub year: Option<i32>,
    pub record_labels: Vec<String>,
    pub release_types: Vec<String>,
    pub is_compilation: bool,
    pub replay_gain: Option<f64>,
    pub replay_gain_peak: Option<f64>,
    pub release_mbid: Option<String>,
    pub release_group_mbid: Option<String>,
    /// Resolved album-artist ids, in tag order
    pub artist_ids: Vec<String>,
    pub artist_names: Vec<String>,
}

/// Outcome of [`AlbumMap::find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumResolution {
    pub id: String,
    /// First time this album was resolved in the current scan
    pub first_seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    No,
    Matched,
    Written,
}

#[derive(Debug)]
struct Entry {
    album: Album,
    artist_ids: Vec<String>,
    /// Album-artist links as stored at scan start
    stored_links: Vec<String>,
    seen: Seen,
}

/// Album resolver for one scan.
#[derive(Debug, Default)]
pub struct AlbumMap {
    entries: Vec<Entry>,
    by_name: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, usize>,
    /// Stored album-artist links, consumed as albums are loaded
    stored_artists: HashMap<String, Vec<String>>,
    pub stats: EntityStats,
}

impl AlbumMap {
    pub async fn load(conn: &mut SqliteConnection) -> sqlx::Result<Self> {
        let mut stored_artists: HashMap<String, Vec<String>> = HashMap::new();
        for (album_id, artist_id) in db::albums::find_all_artist_connections(conn).await? {
            stored_artists.entry(album_id).or_default().push(artist_id);
        }
        debug!(target: "scanner::albums", albums = stored_artists.len(), "Loaded album-artist links");
        Ok(Self {
            stored_artists,
            ..Self::default()
        })
    }

    fn insert(
        &mut self,
        album: Album,
        stored_links: Vec<String>,
        artist_ids: Vec<String>,
        seen: Seen,
    ) -> usize {
        let index = self.entries.len();
        self.by_name.entry(album.name.clone()).or_default().push(index);
        self.by_id.insert(album.id.clone(), index);
        self.entries.push(Entry {
            album,
            artist_ids,
            stored_links,
            seen,
        });
        index
    }

    async fn candidates(
        &mut self,
        conn: &mut SqliteConnection,
        name: &str,
        artist_ids: &[String],
    ) -> sqlx::Result<Vec<usize>> {
        if let Some(indexes) = self.by_name.get(name) {
            return Ok(indexes.clone());
        }
        let found =
            db::albums::find_albums_by_name_with_artist_match_count(conn, name, artist_ids).await?;
        self.by_name.insert(name.to_string(), Vec::new());
        for m in found {
            let links = self.stored_artists.remove(&m.album.id).unwrap_or_default();
            self.insert(m.album, links.clone(), links, Seen::No);
        }
        Ok(self.by_name.get(name).cloned().unwrap_or_default())
    }

    /// Resolve `name` with `params` to an album id.
    pub async fn find_or_create(
        &mut self,
        conn: &mut SqliteConnection,
        name: &str,
        params: &AlbumParams,
        now: DateTime<Utc>,
    ) -> sqlx::Result<AlbumResolution> {
        let candidates = self.candidates(conn, name, &params.artist_ids).await?;
        let matched = candidates
            .into_iter()
            .find(|&i| is_match(&self.entries[i], params));

        let Some(index) = matched else {
            let album = Album {
                id: generate_id(ALBUM_ID_PREFIX),
                name: name.to_string(),
                year: params.year,
                record_labels: Json(params.record_labels.clone()),
                release_types: Json(params.release_types.clone()),
                is_compilation: params.is_compilation,
                replay_gain: params.replay_gain,
                replay_gain_peak: params.replay_gain_peak,
                release_mbid: params.release_mbid.clone(),
                release_group_mbid: params.release_group_mbid.clone(),
                artist_names: Json(params.artist_names.clone()),
                disc_titles: Json(BTreeMap::new()),
            };
            db::albums::create(conn, &album, now).await?;
            debug!(target: "scanner::albums", id = %album.id, name, "Created album");
            self.stats.created += 1;
            let id = album.id.clone();
            self.insert(album, Vec::new(), params.artist_ids.clone(), Seen::Written);
            return Ok(AlbumResolution {
                id,
                first_seen: true,
            });
        };

        let entry = &mut self.entries[index];
        let first_seen = entry.seen == Seen::No;
        if first_seen {
            if apply(entry, params) {
                db::albums::update(conn, &entry.album, now).await?;
                debug!(target: "scanner::albums", id = %entry.album.id, name, "Updated album");
                entry.seen = Seen::Written;
                self.stats.updated += 1;
            } else {
                entry.seen = Seen::Matched;
            }
        }
        Ok(AlbumResolution {
            id: entry.album.id.clone(),
            first_seen,
        })
    }

    /// Record the subtitle of one disc of an album. A file without one clears
    /// the subtitle of its disc. Discs default to 1.
    pub async fn update_disc_title(
        &mut self,
        conn: &mut SqliteConnection,
        album_id: &str,
        disc: Option<i32>,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        let Some(&index) = self.by_id.get(album_id) else {
            return Ok(());
        };
        let entry = &mut self.entries[index];
        let titles = &mut entry.album.disc_titles.0;
        let disc = disc.unwrap_or(1);
        let changed = match title {
            Some(title) if titles.get(&disc).map(String::as_str) == Some(title) => false,
            Some(title) => {
                titles.insert(disc, title.to_string());
                true
            }
            None => titles.remove(&disc).is_some(),
        };
        if !changed {
            return Ok(());
        }
        db::albums::update_disc_titles(conn, album_id, titles, now).await?;
        entry.seen = Seen::Written;
        Ok(())
    }

    /// Rewrite the album-artist links of every album resolved this scan whose
    /// artist list differs from the stored one. Returns how many albums were
    /// relinked.
    ///
    /// Albums never resolved this scan keep their links; they have no songs
    /// left and the reaper removes them together with their links.
    pub async fn write_artist_connections(&self, conn: &mut SqliteConnection) -> sqlx::Result<u64> {
        let changed: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.seen != Seen::No && e.artist_ids != e.stored_links)
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = changed.iter().map(|e| e.album.id.clone()).collect();
        let connections: Vec<AlbumArtistConnection> = changed
            .iter()
            .flat_map(|e| {
                e.artist_ids
                    .iter()
                    .enumerate()
                    .map(move |(i, artist_id)| AlbumArtistConnection {
                        album_id: e.album.id.clone(),
                        artist_id: artist_id.clone(),
                        index: i as i64,
                    })
            })
            .collect();
        db::albums::delete_artist_connections(conn, &ids).await?;
        db::albums::create_artist_connections(conn, &connections).await?;
        Ok(ids.len() as u64)
    }

    /// Advance the watermark of every album matched without changes.
    pub async fn touch_matched(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.seen == Seen::Matched)
            .map(|e| e.album.id.clone())
            .collect();
        db::albums::touch(conn, &ids, now).await
    }
}

fn is_match(entry: &Entry, params: &AlbumParams) -> bool {
    let album = &entry.album;
    if let (Some(a), Some(b)) = (&album.release_mbid, &params.release_mbid) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (&album.release_group_mbid, &params.release_group_mbid) {
        return a == b;
    }
    if !entry.artist_ids.is_empty() && !params.artist_ids.is_empty() {
        let stored: HashSet<&String> = entry.artist_ids.iter().collect();
        let incoming: HashSet<&String> = params.artist_ids.iter().collect();
        return stored == incoming;
    }
    if let (Some(a), Some(b)) = (album.year, params.year) {
        return a == b;
    }
    true
}

/// Copy `params` onto the entry. Returns whether anything changed.
fn apply(entry: &mut Entry, params: &AlbumParams) -> bool {
    let album = &mut entry.album;
    let changed = album.year != params.year
        || album.record_labels.0 != params.record_labels
        || album.release_types.0 != params.release_types
        || album.is_compilation != params.is_compilation
        || album.replay_gain != params.replay_gain
        || album.replay_gain_peak != params.replay_gain_peak
        || album.release_mbid != params.release_mbid
        || album.release_group_mbid != params.release_group_mbid
        || album.artist_names.0 != params.artist_names
        || entry.artist_ids != params.artist_ids;
    if changed {
        album.year = params.year;
        album.record_labels = Json(params.record_labels.clone());
        album.release_types = Json(params.release_types.clone());
        album.is_compilation = params.is_compilation;
        album.replay_gain = params.replay_gain;
        album.replay_gain_peak = params.replay_gain_peak;
        album.release_mbid = params.release_mbid.clone();
        album.release_group_mbid = params.release_group_mbid.clone();
        album.artist_names = Json(params.artist_names.clone());
        entry.artist_ids = params.artist_ids.clone();
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Artist;
    use crate::test_utils::temp_db;

    fn params(artists: &[&str]) -> AlbumParams {
        AlbumParams {
            artist_ids: artists.iter().map(|s| s.to_string()).collect(),
            artist_names: artists.iter().map(|s| s.to_string()).collect(),
            ..AlbumParams::default()
        }
    }

    async fn artist(conn: &mut SqliteConnection, id: &str) {
        let a = Artist {
            id: id.to_string(),
            name: id.to_string(),
            mbid: None,
        };
        db::artists::create(conn, &a, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_mbid_separates_albums() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();

        let mut first = params(&[]);
        first.release_mbid = Some("rel-1".into());
        let mut second = params(&[]);
        second.release_mbid = Some("rel-2".into());

        let a = map.find_or_create(&mut conn, "X", &first, now).await.unwrap();
        let b = map.find_or_create(&mut conn, "X", &second, now).await.unwrap();
        let c = map.find_or_create(&mut conn, "X", &first, now).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert!(a.first_seen && b.first_seen && !c.first_seen);
        assert_eq!(map.stats.created, 2);
    }

    #[tokio::test]
    async fn test_same_artists_without_mbids_collapse() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();

        let a = map.find_or_create(&mut conn, "X", &params(&["ar_1", "ar_2"]), now).await.unwrap();
        let b = map.find_or_create(&mut conn, "X", &params(&["ar_2", "ar_1"]), now).await.unwrap();
        let c = map.find_or_create(&mut conn, "X", &params(&["ar_3"]), now).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_chosen_rule_does_not_fall_through() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();

        let mut first = params(&["ar_1"]);
        first.release_group_mbid = Some("rg-1".into());
        let mut second = params(&["ar_1"]);
        second.release_group_mbid = Some("rg-2".into());

        // Same artists, but the release group decides
        let a = map.find_or_create(&mut conn, "X", &first, now).await.unwrap();
        let b = map.find_or_create(&mut conn, "X", &second, now).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_year_decides_without_other_data() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();

        let mut first = params(&[]);
        first.year = Some(1990);
        let mut second = params(&[]);
        second.year = Some(2005);

        let a = map.find_or_create(&mut conn, "Greatest Hits", &first, now).await.unwrap();
        let b = map.find_or_create(&mut conn, "Greatest Hits", &second, now).await.unwrap();
        let c = map.find_or_create(&mut conn, "Greatest Hits", &params(&[]), now).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_existing_album_updated_once_and_touched() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        artist(&mut conn, "ar_1").await;

        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let created = map.find_or_create(&mut conn, "X", &params(&["ar_1"]), now).await.unwrap();
        map.write_artist_connections(&mut conn).await.unwrap();

        // Next scan, unchanged
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let same = map.find_or_create(&mut conn, "X", &params(&["ar_1"]), now).await.unwrap();
        assert_eq!(same.id, created.id);
        assert_eq!(map.stats, EntityStats::default());
        assert_eq!(map.touch_matched(&mut conn, now).await.unwrap(), 1);

        // Next scan, new year
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let mut changed = params(&["ar_1"]);
        changed.year = Some(2020);
        map.find_or_create(&mut conn, "X", &changed, now).await.unwrap();
        map.find_or_create(&mut conn, "X", &changed, now).await.unwrap();
        assert_eq!(map.stats.updated, 1);
        assert_eq!(map.stats.created, 0);

        let stored = db::albums::find_all(&mut conn).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].year, Some(2020));
    }

    #[tokio::test]
    async fn test_disc_titles() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let album = map.find_or_create(&mut conn, "X", &params(&[]), now).await.unwrap();

        map.update_disc_title(&mut conn, &album.id, Some(2), Some("Live"), now).await.unwrap();
        map.update_disc_title(&mut conn, &album.id, None, Some("Studio"), now).await.unwrap();
        map.update_disc_title(&mut conn, &album.id, Some(3), None, now).await.unwrap();

        let stored = db::albums::find_all(&mut conn).await.unwrap();
        assert_eq!(
            stored[0].disc_titles.0,
            BTreeMap::from([(1, "Studio".to_string()), (2, "Live".to_string())])
        );
    }

    #[tokio::test]
    async fn test_missing_disc_title_clears_it() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let album = map.find_or_create(&mut conn, "X", &params(&[]), now).await.unwrap();
        map.update_disc_title(&mut conn, &album.id, Some(1), Some("Old Subtitle"), now)
            .await
            .unwrap();

        // Next scan, the subtitle tag is gone
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let same = map.find_or_create(&mut conn, "X", &params(&[]), now).await.unwrap();
        map.update_disc_title(&mut conn, &same.id, None, None, now).await.unwrap();
        // Written, not merely touched
        assert_eq!(map.touch_matched(&mut conn, now).await.unwrap(), 0);

        let stored = db::albums::find_all(&mut conn).await.unwrap();
        assert!(stored[0].disc_titles.0.is_empty());
    }

    #[tokio::test]
    async fn test_only_changed_links_are_rewritten() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        artist(&mut conn, "ar_1").await;
        artist(&mut conn, "ar_2").await;
        let release = |artists: &[&str]| AlbumParams {
            release_mbid: Some("rel-1".into()),
            ..params(artists)
        };

        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let album = map.find_or_create(&mut conn, "X", &release(&["ar_1"]), now).await.unwrap();
        assert_eq!(map.write_artist_connections(&mut conn).await.unwrap(), 1);

        // Next scan, same artists
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        map.find_or_create(&mut conn, "X", &release(&["ar_1"]), now).await.unwrap();
        assert_eq!(map.write_artist_connections(&mut conn).await.unwrap(), 0);

        // Next scan, a guest joins the release
        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        map.find_or_create(&mut conn, "X", &release(&["ar_1", "ar_2"]), now).await.unwrap();
        assert_eq!(map.write_artist_connections(&mut conn).await.unwrap(), 1);
        assert_eq!(
            db::albums::find_all_artist_connections(&mut conn).await.unwrap(),
            vec![
                (album.id.clone(), "ar_1".to_string()),
                (album.id, "ar_2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_write_artist_connections_keeps_order() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        artist(&mut conn, "ar_1").await;
        artist(&mut conn, "ar_2").await;

        let mut map = AlbumMap::load(&mut conn).await.unwrap();
        let album = map.find_or_create(&mut conn, "X", &params(&["ar_2", "ar_1"]), now).await.unwrap();
        map.write_artist_connections(&mut conn).await.unwrap();

        assert_eq!(
            db::albums::find_all_artist_connections(&mut conn).await.unwrap(),
            vec![
                (album.id.clone(), "ar_2".to_string()),
                (album.id, "ar_1".to_string())
            ]
        );
    }
}
