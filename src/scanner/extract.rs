//! Turn one audio file into a [`MediaFile`].
//!
//! Everything the rest of the scan needs from a file is read here, once:
//! file system metadata, audio properties, normalized tags, the stamped song
//! id (if any) and whether the file carries embedded artwork.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::cover::CoverSource;
use crate::metadata::{AudioProperties, TagError, TagMap, TagReader, all_values, first_value};
use crate::model::SONG_ID_PREFIX;

/// Prefix of the tag that stamped song ids are stored in.
pub const ID_TAG_PREFIX: &str = "SUBMINDER_ID_";

/// Name of the id tag for a server instance.
pub fn id_tag_key(instance_id: &str) -> String {
    format!("{ID_TAG_PREFIX}{}", instance_id.to_uppercase())
}

/// Everything read from one audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub content_type: String,
    pub properties: AudioProperties,

    pub title: String,
    pub album_name: Option<String>,
    /// Track artists, in tag order
    pub artists: Vec<String>,
    /// Album artists, in tag order
    pub album_artists: Vec<String>,

    /// MusicBrainz recording ID
    pub mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub release_group_mbid: Option<String>,
    /// Positional MBIDs for `artists`
    pub artist_mbids: Vec<String>,
    /// Positional MBIDs for `album_artists`
    pub album_artist_mbids: Vec<String>,

    pub year: Option<i32>,
    pub track: Option<i32>,
    pub disc: Option<i32>,
    pub disc_title: Option<String>,
    pub genres: Vec<String>,
    pub record_labels: Vec<String>,
    pub release_types: Vec<String>,
    pub is_compilation: bool,
    pub bpm: Option<i32>,
    pub track_gain: Option<f64>,
    pub track_peak: Option<f64>,
    pub album_gain: Option<f64>,
    pub album_peak: Option<f64>,
    pub lyrics: Option<String>,

    /// Song id previously written into the file's own tags
    pub stamped_id: Option<String>,
    pub has_embedded_image: bool,
    /// Filled in by the walker
    pub cover: Option<CoverSource>,
}

/// Read `path` through `reader`.
///
/// Returns `Ok(None)` when the file is not a media file: the reader cannot
/// parse it, or it has no audio stream.
pub fn extract(
    reader: &dyn TagReader,
    path: &Path,
    id_tag: &str,
) -> Result<Option<MediaFile>, TagError> {
    let stat = fs::metadata(path)?;

    let file = match reader.open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(target: "scanner::walk", path = %path.display(), error = %e, "Not a media file");
            return Ok(None);
        }
    };
    if !file.has_media() {
        return Ok(None);
    }
    let properties = file.read_audio_properties();
    if properties.is_empty() {
        return Ok(None);
    }

    let tags = file.read_tags();
    let has_embedded_image = file.has_embedded_image();
    drop(file);

    let modified = stat
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::UNIX_EPOCH);

    Ok(Some(from_tags(
        path,
        stat.len(),
        modified,
        properties,
        &tags,
        id_tag,
        has_embedded_image,
    )))
}

fn from_tags(
    path: &Path,
    size: u64,
    modified: DateTime<Utc>,
    properties: AudioProperties,
    tags: &TagMap,
    id_tag: &str,
    has_embedded_image: bool,
) -> MediaFile {
    let title = first_value(tags, &["TITLE"])
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let is_compilation = first_value(tags, &["COMPILATION"]).is_some_and(parse_bool);
    let artists = all_values(tags, &["ARTISTS", "ARTIST"]);
    let mut album_artists = all_values(
        tags,
        &["ALBUMARTISTS", "ALBUM_ARTISTS", "ALBUMARTIST", "ALBUM_ARTIST"],
    );
    if album_artists.is_empty() && !is_compilation {
        album_artists.extend(artists.first().cloned());
    }

    let lyrics = ["LYRICS", "UNSYNCEDLYRICS"]
        .iter()
        .filter_map(|k| tags.get(*k))
        .flatten()
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();

    let stamped_id = first_value(tags, &[id_tag])
        .filter(|id| id.starts_with(SONG_ID_PREFIX))
        .map(str::to_string);

    MediaFile {
        path: path.to_path_buf(),
        size,
        modified,
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        properties,
        title,
        album_name: first_value(tags, &["ALBUM"]).map(str::to_string),
        artists,
        album_artists,
        mbid: first_value(tags, &["MUSICBRAINZ_TRACKID"]).map(str::to_string),
        release_mbid: first_value(tags, &["MUSICBRAINZ_ALBUMID"]).map(str::to_string),
        release_group_mbid: first_value(tags, &["MUSICBRAINZ_RELEASEGROUPID"]).map(str::to_string),
        artist_mbids: all_values(tags, &["MUSICBRAINZ_ARTISTIDS", "MUSICBRAINZ_ARTISTID"]),
        album_artist_mbids: all_values(
            tags,
            &["MUSICBRAINZ_ALBUMARTISTIDS", "MUSICBRAINZ_ALBUMARTISTID"],
        ),
        year: first_value(tags, &["ORIGINALYEAR", "YEAR", "ORIGINALDATE", "DATE"])
            .and_then(|v| parse_leading_number(v, '-')),
        track: first_value(tags, &["TRACKNUMBER"]).and_then(|v| parse_leading_number(v, '/')),
        disc: first_value(tags, &["DISCNUMBER"]).and_then(|v| parse_leading_number(v, '/')),
        disc_title: first_value(tags, &["DISCSUBTITLE"]).map(str::to_string),
        genres: dedup(all_values(tags, &["GENRES", "GENRE"])),
        record_labels: all_values(tags, &["LABELS", "LABEL"]),
        release_types: all_values(tags, &["RELEASETYPES", "RELEASETYPE", "RELEASE_TYPE"]),
        is_compilation,
        bpm: first_value(tags, &["BPM"]).and_then(|v| parse_leading_number(v, '.')),
        track_gain: first_value(tags, &["REPLAYGAIN_TRACK_GAIN"]).and_then(parse_replay_gain),
        track_peak: first_value(tags, &["REPLAYGAIN_TRACK_PEAK"]).and_then(parse_replay_gain),
        album_gain: first_value(tags, &["REPLAYGAIN_ALBUM_GAIN"]).and_then(parse_replay_gain),
        album_peak: first_value(tags, &["REPLAYGAIN_ALBUM_PEAK"]).and_then(parse_replay_gain),
        lyrics: (!lyrics.is_empty()).then(|| lyrics.join("\n")),
        stamped_id,
        has_embedded_image,
        cover: None,
    }
}

/// Parse the number before the first `sep` ("3/12", "1999-04-01").
pub(crate) fn parse_leading_number(value: &str, sep: char) -> Option<i32> {
    value.split(sep).next()?.trim().parse().ok()
}

/// Parse a replay gain value such as "-6.50 dB" or "+1.2dB".
pub(crate) fn parse_replay_gain(value: &str) -> Option<f64> {
    let normalized = value.to_lowercase().replace("db", "").replace('+', "");
    normalized
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "t" | "true" | "yes"
    )
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
