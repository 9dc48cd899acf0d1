//! Database module for song, artist, album and genre persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Every repository function takes a `&mut SqliteConnection` so that a scan
//! can run all of its reads and writes inside one transaction:
//!
//! ```ignore
//! use subminder::db::{self, init_db};
//!
//! let pool = init_db("sqlite:subminder.db").await?;
//! let mut tx = pool.begin().await?;
//! let artists = db::artists::find_all(&mut tx).await?;
//! tx.commit().await?;
//! ```
//!
//! Submodules are split per entity:
//! - [`artists`], [`albums`], [`songs`], [`genres`]: entity tables and their links
//! - [`system`]: key/value state such as the instance id and the scan watermark

pub mod albums;
pub mod artists;
pub mod genres;
pub mod songs;
pub mod system;

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "subminder.db";

/// Maximum number of bound ids per `IN (...)` list.
const MAX_IN_LIST: usize = 500;

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations. Foreign
/// keys are enforced on every connection.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Set the `updated` watermark of every listed row in `table`.
///
/// `table` must be a static table name; ids are bound in chunks.
pub(crate) async fn touch_rows(
    conn: &mut SqliteConnection,
    table: &'static str,
    ids: &[String],
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let mut touched = 0;
    for chunk in ids.chunks(MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {table} SET updated = "));
        qb.push_bind(now.timestamp_micros());
        qb.push(" WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in chunk {
            sep.push_bind(id.clone());
        }
        qb.push(")");
        touched += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(touched)
}

/// Delete every row of `table` whose `column` is in `ids`.
pub(crate) async fn delete_where_in(
    conn: &mut SqliteConnection,
    table: &'static str,
    column: &'static str,
    ids: &[String],
) -> sqlx::Result<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {table} WHERE {column} IN ("));
        let mut sep = qb.separated(", ");
        for id in chunk {
            sep.push_bind(id.clone());
        }
        qb.push(")");
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}
