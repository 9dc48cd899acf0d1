//! [`TagReader`] backed by lofty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::id3::v2::Id3v2Tag;
use lofty::ogg::VorbisComments;
use lofty::picture::PictureType;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagExt, TagItem, TagType};

use super::{AudioProperties, EmbeddedImage, TagError, TagFile, TagMap, TagReader};

/// Reads and writes tags of every format lofty supports.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn open(&self, path: &Path) -> Result<Box<dyn TagFile>, TagError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| TagError::open(path, e))?
            .read()
            .map_err(|e| TagError::open(path, e))?;

        Ok(Box::new(LoftyFile {
            path: path.to_path_buf(),
            tagged_file,
        }))
    }
}

struct LoftyFile {
    path: PathBuf,
    tagged_file: TaggedFile,
}

impl LoftyFile {
    // Get the primary tag, or fall back to the first available tag
    fn tag(&self) -> Option<&Tag> {
        self.tagged_file
            .primary_tag()
            .or_else(|| self.tagged_file.first_tag())
    }
}

impl TagFile for LoftyFile {
    fn has_media(&self) -> bool {
        !self.read_audio_properties().is_empty()
    }

    fn read_tags(&self) -> TagMap {
        let mut map = TagMap::new();
        let Some(tag) = self.tag() else {
            return map;
        };

        // Vorbis comments give every format the same flat key names
        let comments: VorbisComments = tag.clone().into();
        for (key, value) in comments.items() {
            map.entry(key.to_uppercase())
                .or_default()
                .push(value.to_string());
        }
        map
    }

    fn read_audio_properties(&self) -> AudioProperties {
        let props = self.tagged_file.properties();
        AudioProperties {
            duration: props.duration(),
            bit_rate: props
                .audio_bitrate()
                .or_else(|| props.overall_bitrate())
                .unwrap_or(0),
            sample_rate: props.sample_rate().unwrap_or(0),
            channels: props.channels().map(u32::from).unwrap_or(0),
        }
    }

    fn has_embedded_image(&self) -> bool {
        self.tag().is_some_and(|tag| !tag.pictures().is_empty())
    }

    fn read_embedded_image(&self) -> Option<EmbeddedImage> {
        let pictures = self.tag()?.pictures();

        // Prefer front cover, fall back to first picture
        let picture = pictures
            .iter()
            .find(|p| p.pic_type() == PictureType::CoverFront)
            .or_else(|| pictures.first())?;

        Some(EmbeddedImage {
            data: picture.data().to_vec(),
            mime_type: picture.mime_type().map(|m| m.as_str().to_string()),
        })
    }

    fn write_tags(&mut self, tags: &TagMap) -> bool {
        let tag_type = self.tagged_file.primary_tag_type();
        let tag = self
            .tagged_file
            .tag(tag_type)
            .cloned()
            .unwrap_or_else(|| Tag::new(tag_type));

        let result = match tag_type {
            TagType::Id3v2 => save_id3v2(tag, tags, &self.path),
            _ => save_generic(tag, tags, &self.path),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "metadata", path = %self.path.display(), error = %e, "Failed to save tags");
                false
            }
        }
    }
}

fn save_generic(mut tag: Tag, tags: &TagMap, path: &Path) -> Result<(), LoftyError> {
    for (key, values) in tags {
        let item_key = ItemKey::Unknown(key.clone());
        tag.remove_key(&item_key);
        for value in values {
            tag.push(TagItem::new(item_key.clone(), ItemValue::Text(value.clone())));
        }
    }
    tag.save_to_path(path, WriteOptions::default())
}

/// ID3v2 only stores free-form keys as `TXXX` frames named by the key.
///
/// Converting back from the generic tag drops such frames, so every one the
/// file already had is written again next to the new values.
fn save_id3v2(tag: Tag, tags: &TagMap, path: &Path) -> Result<(), LoftyError> {
    let mut user_text: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in tag.items() {
        let (ItemKey::Unknown(key), ItemValue::Text(value)) = (item.key(), item.value()) else {
            continue;
        };
        // Four characters is a frame id, which lofty keeps on its own
        if key.len() != 4 {
            user_text.entry(key.clone()).or_default().push(value.clone());
        }
    }
    for (key, values) in tags {
        user_text.insert(key.clone(), values.clone());
    }

    let mut id3v2 = Id3v2Tag::from(tag);
    for (key, values) in user_text {
        id3v2.remove_user_text(&key);
        if !values.is_empty() {
            // ID3v2.4 separates multiple values with NUL
            id3v2.insert_user_text(key, values.join("\0"));
        }
    }
    id3v2.save_to_path(path, WriteOptions::default())
}
