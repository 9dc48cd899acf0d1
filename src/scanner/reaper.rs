//! Delete rows the current scan did not confirm.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use tracing::info;

use crate::db;

/// Rows removed by [`reap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub songs: u64,
    pub genres: u64,
    pub albums: u64,
    pub artists: u64,
}

/// Remove songs whose watermark predates `scan_start`, then whatever they
/// leave unreferenced. Order matters: each step relies on the previous one.
pub async fn reap(conn: &mut SqliteConnection, scan_start: DateTime<Utc>) -> sqlx::Result<ReapStats> {
    let songs = db::songs::delete_last_updated_before(conn, scan_start).await?;
    let genres = db::genres::delete_unused(conn).await?;
    let albums = db::albums::delete_without_songs(conn).await?;
    let artists = db::artists::delete_unreferenced(conn).await?;

    let stats = ReapStats {
        songs,
        genres,
        albums,
        artists,
    };
    if stats != ReapStats::default() {
        info!(target: "scanner::reaper", songs, genres, albums, artists, "Removed orphaned rows");
    }
    Ok(stats)
}
