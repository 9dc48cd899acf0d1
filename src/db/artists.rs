//! Artist rows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;

use crate::model::{ARTIST_ID_PREFIX, Artist, generate_id};

/// Load every artist, used to seed the artist resolver.
pub async fn find_all(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>("SELECT id, name, mbid FROM artists ORDER BY created, id")
        .fetch_all(&mut *conn)
        .await
}

/// Insert a new artist row.
pub async fn create(
    conn: &mut SqliteConnection,
    artist: &Artist,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO artists (id, name, mbid, created, updated) VALUES (?, ?, ?, ?, ?)")
        .bind(&artist.id)
        .bind(&artist.name)
        .bind(&artist.mbid)
        .bind(now.timestamp_micros())
        .bind(now.timestamp_micros())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace an artist's MusicBrainz ID.
pub async fn update_mbid(
    conn: &mut SqliteConnection,
    id: &str,
    mbid: Option<&str>,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE artists SET mbid = ?, updated = ? WHERE id = ?")
        .bind(mbid)
        .bind(now.timestamp_micros())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Advance the watermark of artists confirmed present without changes.
pub async fn touch(
    conn: &mut SqliteConnection,
    ids: &[String],
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    super::touch_rows(conn, "artists", ids, now).await
}

/// Resolve each name to the oldest artist carrying it, creating missing ones.
///
/// The returned ids are in the same order as `names`.
pub async fn find_or_create_ids_by_names(
    conn: &mut SqliteConnection,
    names: &[String],
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<String>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM artists WHERE name = ? ORDER BY created, id LIMIT 1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;

        match existing {
            Some((id,)) => ids.push(id),
            None => {
                let artist = Artist {
                    id: generate_id(ARTIST_ID_PREFIX),
                    name: name.clone(),
                    mbid: None,
                };
                create(conn, &artist, now).await?;
                ids.push(artist.id);
            }
        }
    }
    Ok(ids)
}

/// Delete artists referenced by neither a song nor an album.
pub async fn delete_unreferenced(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM artists WHERE NOT EXISTS (SELECT 1 FROM song_artists sa WHERE sa.artist_id = artists.id)
           AND NOT EXISTS (SELECT 1 FROM album_artists aa WHERE aa.artist_id = artists.id)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
