//! Command-line interface for subminder.
//!
//! This module provides CLI commands for scanning the library and
//! inspecting what the scanner stored.

mod commands;

pub use commands::{Cli, Commands, run_command};
