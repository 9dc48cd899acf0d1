//! Album rows and their ordered album-artist links.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::model::Album;

const ALBUM_COLUMNS: &str = "id, name, year, record_labels, release_types, is_compilation, replay_gain, \
     replay_gain_peak, release_mbid, release_group_mbid, artist_names, disc_titles";

/// One position in an album's ordered artist list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumArtistConnection {
    pub album_id: String,
    pub artist_id: String,
    pub index: i64,
}

/// An album together with how many of the requested artists it links to.
#[derive(Debug, Clone, FromRow)]
pub struct AlbumMatch {
    #[sqlx(flatten)]
    pub album: Album,
    pub artist_match_count: i64,
}

/// Load every album, used to seed the album resolver.
pub async fn find_all(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Album>> {
    let sql = format!("SELECT {ALBUM_COLUMNS} FROM albums ORDER BY created, id");
    sqlx::query_as::<_, Album>(&sql).fetch_all(&mut *conn).await
}

/// All album-artist links as `(album_id, artist_id)`, in link order.
pub async fn find_all_artist_connections(
    conn: &mut SqliteConnection,
) -> sqlx::Result<Vec<(String, String)>> {
    sqlx::query_as("SELECT album_id, artist_id FROM album_artists ORDER BY album_id, idx")
        .fetch_all(&mut *conn)
        .await
}

/// Albums named `name`, each with the number of `artist_ids` linked to it,
/// best matches first.
pub async fn find_albums_by_name_with_artist_match_count(
    conn: &mut SqliteConnection,
    name: &str,
    artist_ids: &[String],
) -> sqlx::Result<Vec<AlbumMatch>> {
    let columns = ALBUM_COLUMNS
        .split(", ")
        .map(|c| format!("a.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {columns}, (SELECT COUNT(*) FROM album_artists aa WHERE aa.album_id = a.id AND aa.artist_id IN ("
    ));
    if artist_ids.is_empty() {
        qb.push("NULL");
    } else {
        let mut sep = qb.separated(", ");
        for id in artist_ids {
            sep.push_bind(id.clone());
        }
    }
    qb.push(")) AS artist_match_count FROM albums a WHERE a.name = ");
    qb.push_bind(name.to_string());
    qb.push(" ORDER BY artist_match_count DESC, a.created, a.id");

    qb.build_query_as::<AlbumMatch>()
        .fetch_all(&mut *conn)
        .await
}

/// Insert a new album row.
pub async fn create(
    conn: &mut SqliteConnection,
    album: &Album,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO albums (id, name, year, record_labels, release_types, is_compilation, replay_gain,
             replay_gain_peak, release_mbid, release_group_mbid, artist_names, disc_titles, created, updated)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&album.id)
    .bind(&album.name)
    .bind(album.year)
    .bind(&album.record_labels)
    .bind(&album.release_types)
    .bind(album.is_compilation)
    .bind(album.replay_gain)
    .bind(album.replay_gain_peak)
    .bind(&album.release_mbid)
    .bind(&album.release_group_mbid)
    .bind(&album.artist_names)
    .bind(&album.disc_titles)
    .bind(now.timestamp_micros())
    .bind(now.timestamp_micros())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Overwrite the resolvable fields of an album. Disc titles are left alone.
pub async fn update(
    conn: &mut SqliteConnection,
    album: &Album,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE albums SET year = ?, record_labels = ?, release_types = ?, is_compilation = ?,
             replay_gain = ?, replay_gain_peak = ?, release_mbid = ?, release_group_mbid = ?,
             artist_names = ?, updated = ?
         WHERE id = ?",
    )
    .bind(album.year)
    .bind(&album.record_labels)
    .bind(&album.release_types)
    .bind(album.is_compilation)
    .bind(album.replay_gain)
    .bind(album.replay_gain_peak)
    .bind(&album.release_mbid)
    .bind(&album.release_group_mbid)
    .bind(&album.artist_names)
    .bind(now.timestamp_micros())
    .bind(&album.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_disc_titles(
    conn: &mut SqliteConnection,
    id: &str,
    disc_titles: &BTreeMap<i32, String>,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE albums SET disc_titles = ?, updated = ? WHERE id = ?")
        .bind(Json(disc_titles))
        .bind(now.timestamp_micros())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Advance the watermark of albums confirmed present without changes.
pub async fn touch(
    conn: &mut SqliteConnection,
    ids: &[String],
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    super::touch_rows(conn, "albums", ids, now).await
}

pub async fn delete_artist_connections(
    conn: &mut SqliteConnection,
    album_ids: &[String],
) -> sqlx::Result<()> {
    super::delete_where_in(conn, "album_artists", "album_id", album_ids).await?;
    Ok(())
}

pub async fn create_artist_connections(
    conn: &mut SqliteConnection,
    connections: &[AlbumArtistConnection],
) -> sqlx::Result<()> {
    for chunk in connections.chunks(super::MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO album_artists (album_id, artist_id, idx) ");
        qb.push_values(chunk, |mut b, c| {
            b.push_bind(c.album_id.clone())
                .push_bind(c.artist_id.clone())
                .push_bind(c.index);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Delete albums that no song points at.
pub async fn delete_without_songs(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM albums WHERE NOT EXISTS (SELECT 1 FROM songs s WHERE s.album_id = albums.id)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
