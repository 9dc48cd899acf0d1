//! Library scanning and inspection commands.

use std::io::Write;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::config::Config;
use crate::library::Library;
use crate::scanner::ScanSummary;

/// Scan the media directory. Ctrl+C cancels the scan and rolls it back.
pub fn cmd_scan(rt: &Runtime, config: &Config, full: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = Library::open(config).await?;
        println!("Scanning directory: {}", config.library.media_dir.display());

        let scanner = library.scanner.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "scanner", "Interrupted, cancelling scan");
                scanner.cancel();
            }
        });

        let scanner = library.scanner.clone();
        let progress = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                if scanner.is_scanning() {
                    print!("\rScanned {} files...", scanner.count());
                    let _ = std::io::stdout().flush();
                }
            }
        });

        let result = library.scanner.scan(full).await;
        progress.abort();
        interrupt.abort();

        let summary = result?;
        println!();
        print_summary(&summary);
        info!(target: "scanner", elapsed_ms = summary.elapsed.as_millis() as u64, "Scan command finished");
        anyhow::Ok(())
    })
}

fn print_summary(summary: &ScanSummary) {
    println!(
        "Scan complete: {} files in {} directories ({:.1}s)",
        summary.walk.media_files,
        summary.walk.directories,
        summary.elapsed.as_secs_f64()
    );
    println!(
        "  Songs:   {} created, {} updated, {} removed",
        summary.songs.songs_created, summary.songs.songs_updated, summary.reaped.songs
    );
    println!(
        "  Albums:  {} created, {} updated, {} removed",
        summary.albums.created, summary.albums.updated, summary.reaped.albums
    );
    println!(
        "  Artists: {} created, {} updated, {} removed",
        summary.artists.created, summary.artists.updated, summary.reaped.artists
    );
    println!(
        "  Covers:  {} written, {} removed, {} failed",
        summary.covers.written, summary.covers.removed, summary.covers.failed
    );
    if summary.artist_images > 0 {
        println!("  {} artists have an image", summary.artist_images);
    }
    if summary.stamps.failed > 0 {
        println!("  {} files could not be stamped with their song id", summary.stamps.failed);
    }
}

/// Print row counts of the library
pub fn cmd_stats(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = Library::open(config).await?;
        let stats = library.stats().await?;
        println!("Songs:   {}", stats.songs);
        println!("Albums:  {}", stats.albums);
        println!("Artists: {}", stats.artists);
        println!("Genres:  {}", stats.genres);
        anyhow::Ok(())
    })
}

/// List all songs in the library
pub fn cmd_list(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let library = Library::open(config).await?;
        for song in library.songs().await? {
            let artists = song.artist_names.0.join(", ");
            match &song.album_name {
                Some(album) => println!("{} - {} [{}]  {}", artists, song.title, album, song.path),
                None => println!("{} - {}  {}", artists, song.title, song.path),
            }
        }
        anyhow::Ok(())
    })
}
