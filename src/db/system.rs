//! Server-wide key/value state.

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use sqlx::sqlite::SqliteConnection;

use crate::model::from_micros;

const INSTANCE_ID_KEY: &str = "instance_id";
const LAST_SCAN_KEY: &str = "last_scan";

pub async fn get(conn: &mut SqliteConnection, key: &str) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM system WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(value,)| value))
}

pub async fn set(conn: &mut SqliteConnection, key: &str, value: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO system (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Identifier of this server instance, generated on first use.
///
/// Embedded in the name of the tag that stamped song ids are written to, so
/// two servers sharing one media tree don't overwrite each other's ids.
pub async fn instance_id(conn: &mut SqliteConnection) -> sqlx::Result<String> {
    if let Some(id) = get(conn, INSTANCE_ID_KEY).await? {
        return Ok(id);
    }
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    set(conn, INSTANCE_ID_KEY, &id).await?;
    Ok(id)
}

/// Start time of the last committed scan.
pub async fn last_scan(conn: &mut SqliteConnection) -> sqlx::Result<Option<DateTime<Utc>>> {
    Ok(get(conn, LAST_SCAN_KEY)
        .await?
        .and_then(|v| v.parse::<i64>().ok())
        .map(from_micros))
}

pub async fn set_last_scan(conn: &mut SqliteConnection, at: DateTime<Utc>) -> sqlx::Result<()> {
    set(conn, LAST_SCAN_KEY, &at.timestamp_micros().to_string()).await
}
