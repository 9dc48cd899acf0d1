//! subminder - the library scanner of a Subsonic-compatible music server.
//!
//! Scans a music directory into a SQLite library: songs, albums and artists
//! with stable identities, rendered covers, and ids stamped back into the
//! audio files so moved files keep their identity.

pub mod cli;
pub mod config;
pub mod cover;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("subminder=info".parse()?))
        .init();

    cli::run_command(&args)
}
