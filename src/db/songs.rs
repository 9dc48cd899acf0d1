//! Song rows, their ordered artist links and genre links.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::query_builder::Separated;
use sqlx::{QueryBuilder, Sqlite};

use crate::model::{Song, SongLookup};

const SONG_COLUMNS: &str = "id, path, album_id, album_name, title, track, disc, year, size, content_type, \
     duration_ms, bit_rate, sampling_rate, channel_count, bpm, mbid, release_mbid, release_group_mbid, \
     replay_gain, replay_gain_peak, lyrics, artist_names, modified";

/// Rows per multi-row insert; each song binds 25 values.
const INSERT_CHUNK: usize = 200;

/// One position in a song's ordered artist list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongArtistConnection {
    pub song_id: String,
    pub artist_id: String,
    pub index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongGenreConnection {
    pub song_id: String,
    pub genre: String,
}

pub async fn count(conn: &mut SqliteConnection) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM songs")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Every song, ordered by path.
pub async fn find_all(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Song>> {
    let sql = format!("SELECT {SONG_COLUMNS} FROM songs ORDER BY path, id");
    sqlx::query_as::<_, Song>(&sql).fetch_all(&mut *conn).await
}

/// Bind one song's values in [`SONG_COLUMNS`] order.
fn push_song<'args>(b: &mut Separated<'_, 'args, Sqlite, &'static str>, s: &Song) {
    b.push_bind(s.id.clone())
        .push_bind(s.path.clone())
        .push_bind(s.album_id.clone())
        .push_bind(s.album_name.clone())
        .push_bind(s.title.clone())
        .push_bind(s.track)
        .push_bind(s.disc)
        .push_bind(s.year)
        .push_bind(s.size)
        .push_bind(s.content_type.clone())
        .push_bind(s.duration_ms)
        .push_bind(s.bit_rate)
        .push_bind(s.sampling_rate)
        .push_bind(s.channel_count)
        .push_bind(s.bpm)
        .push_bind(s.mbid.clone())
        .push_bind(s.release_mbid.clone())
        .push_bind(s.release_group_mbid.clone())
        .push_bind(s.replay_gain)
        .push_bind(s.replay_gain_peak)
        .push_bind(s.lyrics.clone())
        .push_bind(s.artist_names.clone())
        .push_bind(s.modified);
}

/// Insert all songs with a multi-row insert per chunk.
pub async fn create_all(
    conn: &mut SqliteConnection,
    songs: &[Song],
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    for chunk in songs.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO songs ({SONG_COLUMNS}, created, updated) "));
        qb.push_values(chunk, |mut b, s| {
            push_song(&mut b, s);
            b.push_bind(now.timestamp_micros())
                .push_bind(now.timestamp_micros());
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Update every song that still exists, returning how many rows matched.
///
/// Each chunk is one `UPDATE ... FROM` over a `VALUES` list. Songs whose id
/// is gone are silently skipped; callers compare the count against
/// `songs.len()` and use [`find_non_existent_ids`] to find them.
pub async fn try_update_all(
    conn: &mut SqliteConnection,
    songs: &[Song],
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let assignments = SONG_COLUMNS
        .split(',')
        .map(str::trim)
        .filter(|c| *c != "id")
        .map(|c| format!("{c} = v.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut updated = 0;
    for chunk in songs.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("WITH v ({SONG_COLUMNS}) AS ("));
        qb.push_values(chunk, |mut b, s| push_song(&mut b, s));
        qb.push(format!(") UPDATE songs SET {assignments}, updated = "));
        qb.push_bind(now.timestamp_micros());
        qb.push(" FROM v WHERE songs.id = v.id");
        updated += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(updated)
}

/// The subset of `ids` with no song row.
pub async fn find_non_existent_ids(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> sqlx::Result<HashSet<String>> {
    let mut missing: HashSet<String> = ids.iter().cloned().collect();
    for chunk in ids.chunks(super::MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM songs WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in chunk {
            sep.push_bind(id.clone());
        }
        qb.push(")");
        let found: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
        for (id,) in found {
            missing.remove(&id);
        }
    }
    Ok(missing)
}

/// Songs whose path is in `paths` or whose recording MBID is in `mbids`.
pub async fn find_all_by_path_or_mbid(
    conn: &mut SqliteConnection,
    paths: &[String],
    mbids: &[String],
) -> sqlx::Result<Vec<SongLookup>> {
    if paths.is_empty() && mbids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, path, mbid, release_mbid, release_group_mbid FROM songs WHERE path IN (",
    );
    push_list(&mut qb, paths);
    qb.push(") OR mbid IN (");
    push_list(&mut qb, mbids);
    qb.push(") ORDER BY created, id");
    qb.build_query_as().fetch_all(&mut *conn).await
}

fn push_list(qb: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    if values.is_empty() {
        qb.push("NULL");
        return;
    }
    let mut sep = qb.separated(", ");
    for v in values {
        sep.push_bind(v.clone());
    }
}

pub async fn delete_artist_connections(
    conn: &mut SqliteConnection,
    song_ids: &[String],
) -> sqlx::Result<()> {
    super::delete_where_in(conn, "song_artists", "song_id", song_ids).await?;
    Ok(())
}

pub async fn create_artist_connections(
    conn: &mut SqliteConnection,
    connections: &[SongArtistConnection],
) -> sqlx::Result<()> {
    for chunk in connections.chunks(super::MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO song_artists (song_id, artist_id, idx) ");
        qb.push_values(chunk, |mut b, c| {
            b.push_bind(c.song_id.clone())
                .push_bind(c.artist_id.clone())
                .push_bind(c.index);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn delete_genre_connections(
    conn: &mut SqliteConnection,
    song_ids: &[String],
) -> sqlx::Result<()> {
    super::delete_where_in(conn, "song_genres", "song_id", song_ids).await?;
    Ok(())
}

pub async fn create_genre_connections(
    conn: &mut SqliteConnection,
    connections: &[SongGenreConnection],
) -> sqlx::Result<()> {
    for chunk in connections.chunks(super::MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO song_genres (song_id, genre) ");
        qb.push_values(chunk, |mut b, c| {
            b.push_bind(c.song_id.clone()).push_bind(c.genre.clone());
        });
        qb.push(" ON CONFLICT DO NOTHING");
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Delete songs whose watermark predates `before`.
pub async fn delete_last_updated_before(
    conn: &mut SqliteConnection,
    before: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM songs WHERE updated < ?")
        .bind(before.timestamp_micros())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
