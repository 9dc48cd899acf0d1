//! Genre names.

use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite};

/// Insert any genre names that do not exist yet.
pub async fn create_if_not_exists(
    conn: &mut SqliteConnection,
    names: &[String],
) -> sqlx::Result<()> {
    for chunk in names.chunks(super::MAX_IN_LIST) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO genres (name) ");
        qb.push_values(chunk, |mut b, name| {
            b.push_bind(name.clone());
        });
        qb.push(" ON CONFLICT (name) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Delete genres no song links to.
pub async fn delete_unused(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM genres WHERE NOT EXISTS (SELECT 1 FROM song_genres sg WHERE sg.genre = genres.name)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// All genre names, sorted.
pub async fn find_all(conn: &mut SqliteConnection) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM genres ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}
