//! A configured library: database, caches and scanner wired together.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::cover::ObjectCache;
use crate::db;
use crate::error::{Error, Result, ResultExt};
use crate::metadata::{LoftyTagReader, TagReader};
use crate::model::Song;
use crate::scanner::{Scanner, ScannerOptions};

/// Row counts of the library tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub songs: i64,
    pub albums: i64,
    pub artists: i64,
    pub genres: i64,
}

pub struct Library {
    pub pool: SqlitePool,
    pub scanner: Arc<Scanner>,
}

impl Library {
    /// Open the library described by `config` using lofty for tags.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_with_reader(config, Arc::new(LoftyTagReader)).await
    }

    pub async fn open_with_reader(config: &Config, reader: Arc<dyn TagReader>) -> Result<Self> {
        let data = &config.data;
        std::fs::create_dir_all(&data.data_dir)
            .with_context(format!("creating data directory {}", data.data_dir.display()))?;
        let pool = db::init_db(&db::db_url(Some(&data.database())))
            .await
            .with_context("opening database")?;

        let thumbnails = ObjectCache::open(data.thumbnail_dir()).with_context("opening thumbnail cache")?;
        let transcodes = ObjectCache::open(data.transcode_dir()).with_context("opening transcode cache")?;

        let options = ScannerOptions {
            media_dir: config.library.media_dir.clone(),
            scan_hidden: config.library.scan_hidden,
            cover_priority: config.library.cover_priority(),
            artist_image_priority: config.library.artist_image_priority(),
            cover_dir: data.cover_dir(),
            walk_workers: config.scanner.walk_workers,
            cover_workers: config.scanner.cover_workers,
            stamp_workers: config.scanner.stamp_workers,
            batch_size: config.scanner.batch_size,
        };
        let scanner = Scanner::new(pool.clone(), options, reader)
            .with_thumbnails(Arc::new(thumbnails))
            .with_transcodes(Arc::new(transcodes));

        Ok(Self {
            pool,
            scanner: Arc::new(scanner),
        })
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        let count = |table: &'static str| {
            let pool = self.pool.clone();
            async move {
                let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&pool)
                    .await?;
                Ok::<_, Error>(n)
            }
        };
        Ok(LibraryStats {
            songs: count("songs").await?,
            albums: count("albums").await?,
            artists: count("artists").await?,
            genres: count("genres").await?,
        })
    }

    /// Every song, ordered by path.
    pub async fn songs(&self) -> Result<Vec<Song>> {
        let mut conn = self.pool.acquire().await?;
        Ok(db::songs::find_all(&mut conn).await?)
    }
}
