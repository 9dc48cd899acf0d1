//! In-memory artist identity map.
//!
//! Seeded from the database at scan start and owned by the song consumer,
//! so it needs no locking. Several artists may share a display name; the
//! MusicBrainz ID tells them apart when both sides have one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use super::EntityStats;
use crate::db;
use crate::model::{ARTIST_ID_PREFIX, Artist, generate_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    No,
    /// Matched this scan, row unchanged
    Matched,
    /// Created or updated this scan
    Written,
}

#[derive(Debug)]
struct Entry {
    artist: Artist,
    seen: Seen,
}

/// Artist resolver for one scan.
#[derive(Debug, Default)]
pub struct ArtistMap {
    by_name: HashMap<String, Vec<Entry>>,
    pub stats: EntityStats,
}

impl ArtistMap {
    /// Build the map from every stored artist.
    pub async fn load(conn: &mut SqliteConnection) -> sqlx::Result<Self> {
        let mut map = Self::default();
        for artist in db::artists::find_all(conn).await? {
            map.insert(artist, Seen::No);
        }
        debug!(target: "scanner::artists", names = map.by_name.len(), "Loaded artists");
        Ok(map)
    }

    fn insert(&mut self, artist: Artist, seen: Seen) {
        self.by_name
            .entry(artist.name.clone())
            .or_default()
            .push(Entry { artist, seen });
    }

    /// Resolve `name` to an artist id, creating the artist if nothing matches.
    ///
    /// The first candidate wins unless both it and the incoming artist carry
    /// an MBID and the two differ. A matched artist gets the incoming MBID
    /// at most once per scan.
    pub async fn find_or_create(
        &mut self,
        conn: &mut SqliteConnection,
        name: &str,
        mbid: Option<&str>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<String> {
        let found = self.by_name.get_mut(name).and_then(|candidates| {
            candidates
                .iter_mut()
                .find(|e| match (mbid, e.artist.mbid.as_deref()) {
                    (Some(incoming), Some(stored)) => incoming == stored,
                    _ => true,
                })
        });

        if let Some(entry) = found {
            if entry.seen == Seen::No {
                let changed = mbid.is_some() && entry.artist.mbid.as_deref() != mbid;
                if changed {
                    db::artists::update_mbid(conn, &entry.artist.id, mbid, now).await?;
                    entry.artist.mbid = mbid.map(str::to_string);
                    entry.seen = Seen::Written;
                    self.stats.updated += 1;
                } else {
                    entry.seen = Seen::Matched;
                }
            }
            return Ok(entry.artist.id.clone());
        }

        let artist = Artist {
            id: generate_id(ARTIST_ID_PREFIX),
            name: name.to_string(),
            mbid: mbid.map(str::to_string),
        };
        db::artists::create(conn, &artist, now).await?;
        debug!(target: "scanner::artists", id = %artist.id, name, "Created artist");
        self.stats.created += 1;
        let id = artist.id.clone();
        self.insert(artist, Seen::Written);
        Ok(id)
    }

    /// Resolve an ordered artist list. `mbids` are positional and may be
    /// shorter than `names`. Duplicate ids are dropped, keeping first position.
    pub async fn find_or_create_all(
        &mut self,
        conn: &mut SqliteConnection,
        names: &[String],
        mbids: &[String],
        now: DateTime<Utc>,
    ) -> sqlx::Result<Vec<String>> {
        let mut ids = Vec::with_capacity(names.len());
        let mut unique = HashSet::new();
        for (i, name) in names.iter().enumerate() {
            let mbid = mbids.get(i).map(String::as_str).filter(|m| !m.is_empty());
            let id = self.find_or_create(conn, name, mbid, now).await?;
            if unique.insert(id.clone()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Ids of the artists named `name` that this scan has seen.
    pub fn seen_named(&self, name: &str) -> Vec<String> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter(|e| e.seen != Seen::No)
            .map(|e| e.artist.id.clone())
            .collect()
    }

    /// Ids of artists matched this scan whose rows were not written.
    pub fn untouched_matches(&self) -> Vec<String> {
        self.by_name
            .values()
            .flatten()
            .filter(|e| e.seen == Seen::Matched)
            .map(|e| e.artist.id.clone())
            .collect()
    }

    /// Advance the watermark of every artist matched without changes.
    pub async fn touch_matched(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64> {
        db::artists::touch(conn, &self.untouched_matches(), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_db;

    #[tokio::test]
    async fn test_same_name_different_mbid_are_distinct() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = ArtistMap::load(&mut conn).await.unwrap();

        let a = map.find_or_create(&mut conn, "Low", Some("mb-1"), now).await.unwrap();
        let b = map.find_or_create(&mut conn, "Low", Some("mb-2"), now).await.unwrap();
        let again = map.find_or_create(&mut conn, "Low", Some("mb-2"), now).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(b, again);
        assert_eq!(map.stats.created, 2);
        assert_eq!(db::artists::find_all(&mut conn).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_mbid_matches_first_candidate() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut map = ArtistMap::load(&mut conn).await.unwrap();

        let a = map.find_or_create(&mut conn, "Bob", Some("mb-1"), now).await.unwrap();
        let b = map.find_or_create(&mut conn, "Bob", None, now).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_first_compatible_candidate_wins() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let plain = Artist {
            id: "ar_1".to_string(),
            name: "Bob".to_string(),
            mbid: None,
        };
        let tagged = Artist {
            id: "ar_2".to_string(),
            name: "Bob".to_string(),
            mbid: Some("mb-1".to_string()),
        };
        db::artists::create(&mut conn, &plain, now).await.unwrap();
        db::artists::create(&mut conn, &tagged, now + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let mut map = ArtistMap::load(&mut conn).await.unwrap();
        let id = map.find_or_create(&mut conn, "Bob", Some("mb-1"), now).await.unwrap();
        assert_eq!(id, "ar_1");
        assert_eq!(map.seen_named("Bob"), vec!["ar_1".to_string()]);
        assert!(map.seen_named("Eve").is_empty());
    }

    #[tokio::test]
    async fn test_mbid_learned_once_per_scan() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let artist = Artist {
            id: "ar_1".to_string(),
            name: "Bob".to_string(),
            mbid: None,
        };
        db::artists::create(&mut conn, &artist, now).await.unwrap();

        let mut map = ArtistMap::load(&mut conn).await.unwrap();
        let id = map.find_or_create(&mut conn, "Bob", Some("mb-1"), now).await.unwrap();
        assert_eq!(id, "ar_1");
        assert_eq!(map.stats.updated, 1);

        // Already written this scan
        map.find_or_create(&mut conn, "Bob", None, now).await.unwrap();
        assert_eq!(map.stats.updated, 1);

        let stored = db::artists::find_all(&mut conn).await.unwrap();
        assert_eq!(stored[0].mbid.as_deref(), Some("mb-1"));
        assert!(map.untouched_matches().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_match_is_only_touched() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let artist = Artist {
            id: "ar_1".to_string(),
            name: "Bob".to_string(),
            mbid: Some("mb-1".to_string()),
        };
        db::artists::create(&mut conn, &artist, now).await.unwrap();

        let mut map = ArtistMap::load(&mut conn).await.unwrap();
        map.find_or_create(&mut conn, "Bob", None, now).await.unwrap();

        assert_eq!(map.stats, EntityStats::default());
        assert_eq!(map.untouched_matches(), vec!["ar_1".to_string()]);
        assert_eq!(map.touch_matched(&mut conn, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_all_dedupes() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut map = ArtistMap::load(&mut conn).await.unwrap();
        let names = vec!["A".to_string(), "B".to_string(), "A".to_string()];

        let ids = map
            .find_or_create_all(&mut conn, &names, &[], Utc::now())
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(map.stats.created, 2);
    }
}
