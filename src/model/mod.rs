//! Core data models for the music library.
//!
//! Defines the persisted entities: [`Song`], [`Artist`], and [`Album`].
//! These are derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `artists` - Artists; several rows may share a display name
//! - `albums` - Albums with their ordered album-artist names
//! - `songs` - Individual audio files with metadata
//!
//! Link tables (`album_artists`, `song_artists`, `song_genres`) are written
//! through the repository functions in [`crate::db`] and have no row type.
//!
//! Timestamps (`created`, `updated`, `modified`) are stored as microseconds
//! since the Unix epoch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use sqlx::FromRow;
use sqlx::types::Json;

/// Prefix of every song id. Stamped ids without it are ignored.
pub const SONG_ID_PREFIX: &str = "tr_";
/// Prefix of every album id.
pub const ALBUM_ID_PREFIX: &str = "al_";
/// Prefix of every artist id.
pub const ARTIST_ID_PREFIX: &str = "ar_";

const ID_LENGTH: usize = 22;

/// Generate a new random entity id with the given prefix.
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}

/// Convert a stored timestamp back into a `DateTime`, clamping garbage to the epoch.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

/// An artist in the music library.
#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    /// Database ID (`ar_` prefixed)
    pub id: String,
    /// Display name (not unique)
    pub name: String,
    /// MusicBrainz artist ID
    pub mbid: Option<String>,
}

/// An album in the music library.
#[derive(Debug, Clone, FromRow)]
pub struct Album {
    /// Database ID (`al_` prefixed)
    pub id: String,
    /// Album title
    pub name: String,
    /// Release year
    pub year: Option<i32>,
    pub record_labels: Json<Vec<String>>,
    pub release_types: Json<Vec<String>>,
    pub is_compilation: bool,
    pub replay_gain: Option<f64>,
    pub replay_gain_peak: Option<f64>,
    /// MusicBrainz release ID
    pub release_mbid: Option<String>,
    /// MusicBrainz release group ID
    pub release_group_mbid: Option<String>,
    /// Ordered album-artist display names
    pub artist_names: Json<Vec<String>>,
    /// Disc number to disc subtitle
    pub disc_titles: Json<BTreeMap<i32, String>>,
}

/// A song (audio file) in the music library.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Song {
    /// Database ID (`tr_` prefixed)
    pub id: String,
    /// Absolute file path
    pub path: String,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    /// Track title (from metadata or filename)
    pub title: String,
    pub track: Option<i32>,
    pub disc: Option<i32>,
    pub year: Option<i32>,
    /// File size in bytes
    pub size: i64,
    pub content_type: String,
    pub duration_ms: i64,
    pub bit_rate: i32,
    pub sampling_rate: i32,
    pub channel_count: i32,
    pub bpm: Option<i32>,
    /// MusicBrainz recording ID
    pub mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub release_group_mbid: Option<String>,
    pub replay_gain: Option<f64>,
    pub replay_gain_peak: Option<f64>,
    pub lyrics: Option<String>,
    /// Ordered track-artist display names
    pub artist_names: Json<Vec<String>>,
    /// File modification time
    pub modified: i64,
}

/// The columns needed to match an unidentified file against known songs.
#[derive(Debug, Clone, FromRow)]
pub struct SongLookup {
    pub id: String,
    pub path: String,
    pub mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub release_group_mbid: Option<String>,
}
