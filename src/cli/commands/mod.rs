//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `scan`: Library scanning, listing and statistics

mod scan;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config};

pub use scan::{cmd_list, cmd_scan, cmd_stats};

/// subminder CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true, env = "SUBMINDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the media directory from the config file
    #[arg(long, global = true, env = "SUBMINDER_MEDIA_DIR")]
    pub media_dir: Option<PathBuf>,

    /// Override the data directory from the config file
    #[arg(long, global = true, env = "SUBMINDER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan the media directory and update the library
    Scan {
        /// Treat every file as changed and clear the thumbnail cache
        #[arg(long)]
        full: bool,
    },
    /// Show how many songs, albums, artists and genres are stored
    Stats,
    /// List all songs in the library
    List,
}

impl Cli {
    /// Configuration from file with command-line overrides applied.
    pub fn resolve_config(&self) -> Config {
        let mut config = config::load(self.config.as_deref());
        if let Some(dir) = &self.media_dir {
            config.library.media_dir = dir.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data.data_dir = dir.clone();
        }
        config
    }
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = cli.resolve_config();

    match &cli.command {
        Commands::Scan { full } => cmd_scan(&rt, &config, *full),
        Commands::Stats => cmd_stats(&rt, &config),
        Commands::List => cmd_list(&rt, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_full() {
        let cli = Cli::try_parse_from(["subminder", "scan", "--full", "--media-dir", "/srv/music"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan { full: true }));
        assert_eq!(cli.media_dir, Some(PathBuf::from("/srv/music")));
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["subminder"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[library]\nmedia_dir = \"/from/file\"\nscan_hidden = true\n").unwrap();

        let cli = Cli::try_parse_from([
            "subminder",
            "--config",
            path.to_str().unwrap(),
            "--data-dir",
            "/var/lib/subminder",
            "stats",
        ])
        .unwrap();
        let config = cli.resolve_config();

        assert_eq!(config.library.media_dir, PathBuf::from("/from/file"));
        assert!(config.library.scan_hidden);
        assert_eq!(config.data.data_dir, PathBuf::from("/var/lib/subminder"));
    }
}
