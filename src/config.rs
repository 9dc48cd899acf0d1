//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\subminder\config.toml
//! - macOS: ~/Library/Application Support/subminder/config.toml
//! - Linux: ~/.config/subminder/config.toml
//!
//! Every section is optional. Missing keys take their defaults, and a missing
//! or broken file yields the default configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cover::CoverPriority;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Media library settings
    pub library: LibraryConfig,

    /// Where the server keeps its own files
    pub data: DataConfig,

    /// Scanner tuning
    pub scanner: ScannerConfig,
}

/// Media library settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root of the music tree
    pub media_dir: PathBuf,

    /// Whether files and directories starting with `.` are scanned
    pub scan_hidden: bool,

    /// Folder image stems in priority order; `"embedded"` ranks embedded artwork
    pub cover_priority: Vec<String>,

    /// Image stems marking an artist image in a directory named after the artist
    pub artist_image_priority: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            media_dir: dirs::audio_dir().unwrap_or_else(|| PathBuf::from("music")),
            scan_hidden: false,
            cover_priority: vec!["front".into(), "folder".into(), "cover".into()],
            artist_image_priority: vec!["artist".into()],
        }
    }
}

impl LibraryConfig {
    pub fn cover_priority(&self) -> CoverPriority {
        CoverPriority::new(&self.cover_priority)
    }

    pub fn artist_image_priority(&self) -> CoverPriority {
        CoverPriority::new(&self.artist_image_priority)
    }
}

/// Data directory layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .map(|d| d.join("subminder"))
                .unwrap_or_else(|| PathBuf::from("data")),
        }
    }
}

impl DataConfig {
    /// SQLite database file
    pub fn database(&self) -> PathBuf {
        self.data_dir.join(crate::db::DEFAULT_DB_NAME)
    }

    /// Rendered album and song covers
    pub fn cover_dir(&self) -> PathBuf {
        self.data_dir.join("covers")
    }

    /// Resized covers
    pub fn thumbnail_dir(&self) -> PathBuf {
        self.data_dir.join("cache").join("covers")
    }

    pub fn transcode_dir(&self) -> PathBuf {
        self.data_dir.join("cache").join("transcode")
    }
}

/// Scanner worker counts and batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub walk_workers: usize,
    pub cover_workers: usize,
    pub stamp_workers: usize,
    /// Songs written per database round trip
    pub batch_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            walk_workers: 10,
            cover_workers: 10,
            stamp_workers: 10,
            batch_size: 100,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("subminder"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from `path`, or from [`config_path`] when `None`.
///
/// Returns default config if the file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load(path: Option<&Path>) -> Config {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file found, using defaults");
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to parse config file");
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            Config::default()
        }
    }
}

/// Save configuration to `path`, or to [`config_path`] when `None`.
///
/// Creates the parent directory if it doesn't exist.
pub fn save(config: &Config, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(config_path)
        .ok_or(ConfigError::NoConfigDir)?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
