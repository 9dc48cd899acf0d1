//! Application-wide error types.
//!
//! Subsystems return their own `thiserror` enums ([`ScanError`],
//! [`TagError`], [`CacheError`], [`CoverError`], [`ConfigError`]). This module
//! gathers them into [`Error`] for code that ties subsystems together, such as
//! opening a library. The CLI converts everything into `anyhow` at the edge.
//!
//! # Example
//!
//! ```ignore
//! use subminder::error::{Result, ResultExt};
//!
//! fn open_covers(dir: &Path) -> Result<()> {
//!     std::fs::create_dir_all(dir).with_context("creating cover directory")?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::cover::{CacheError, CoverError};
use crate::metadata::TagError;
use crate::scanner::ScanError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Cover error: {0}")]
    Cover(#[from] CoverError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(ctx))
    }
}
