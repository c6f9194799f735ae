//! Lofty-backed provenance codec.
//!
//! Provenance fields are stored as custom tag items so they survive in any
//! container family (Vorbis comments, ID3v2, MP4 ilst) without a sidecar
//! file.

use std::path::Path;

use async_trait::async_trait;
use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagExt, TagItem};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CodecError, Provenance, ProvenanceCodec};

const KEY_FINGERPRINT: &str = "SOUNDMIRROR_FP";
const KEY_ENCODER: &str = "SOUNDMIRROR_ENCODER";
const KEY_QUALITY: &str = "SOUNDMIRROR_QUALITY";
const KEY_FORMAT_VERSION: &str = "SOUNDMIRROR_FMTV";
const KEY_SOURCE_REL: &str = "SOUNDMIRROR_SRC";
const KEY_PREFIX: &str = "SOUNDMIRROR_";

/// Provenance codec backed by the `lofty` tagging library.
pub struct LoftyCodec {
    parse_options: ParseOptions,
}

impl LoftyCodec {
    pub fn new() -> Self {
        Self {
            parse_options: ParseOptions::new(),
        }
    }
}

impl Default for LoftyCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvenanceCodec for LoftyCodec {
    async fn read(&self, path: &Path) -> Result<Provenance, CodecError> {
        let owned = path.to_path_buf();
        let options = self.parse_options;
        tokio::task::spawn_blocking(move || read_blocking(&owned, options))
            .await
            .map_err(|e| CodecError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    }

    async fn write(&self, path: &Path, provenance: &Provenance) -> Result<(), CodecError> {
        let owned = path.to_path_buf();
        let provenance = provenance.clone();
        let options = self.parse_options;
        tokio::task::spawn_blocking(move || write_blocking(&owned, &provenance, options))
            .await
            .map_err(|e| CodecError::Write {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    }

    async fn read_tags_digest(&self, path: &Path) -> Result<Option<String>, CodecError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || tags_digest(&owned))
            .await
            .map_err(|e| CodecError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    async fn copy_tags(
        &self,
        source: &Path,
        dest: &Path,
        provenance: &Provenance,
    ) -> Result<(), CodecError> {
        let source_owned = source.to_path_buf();
        let dest_owned = dest.to_path_buf();
        let provenance = provenance.clone();
        let options = self.parse_options;
        tokio::task::spawn_blocking(move || {
            copy_tags_blocking(&source_owned, &dest_owned, &provenance, options)
        })
        .await
        .map_err(|e| CodecError::Write {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        })?
    }
}

fn read_blocking(path: &Path, options: ParseOptions) -> Result<Provenance, CodecError> {
    let tagged = match Probe::open(path).and_then(|p| p.options(options).read()) {
        Ok(t) => t,
        Err(e) => {
            // Unreadable tags mean a legacy output, not a failed index build.
            debug!("unreadable tags in {}: {}", path.display(), e);
            return Ok(Provenance::default());
        }
    };
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(Provenance::default());
    };

    let get = |key: &str| {
        tag.get_string(&ItemKey::Unknown(key.to_string()))
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    Ok(Provenance {
        source_fingerprint: get(KEY_FINGERPRINT),
        encoder_id: get(KEY_ENCODER),
        quality: get(KEY_QUALITY),
        format_version: get(KEY_FORMAT_VERSION),
        source_rel_path: get(KEY_SOURCE_REL),
    })
}

fn write_blocking(
    path: &Path,
    provenance: &Provenance,
    options: ParseOptions,
) -> Result<(), CodecError> {
    let tagged = Probe::open(path)
        .and_then(|p| p.options(options).read())
        .map_err(|e| CodecError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut tag = tagged
        .primary_tag()
        .or_else(|| tagged.first_tag())
        .cloned()
        .unwrap_or_else(|| Tag::new(tagged.primary_tag_type()));

    set_provenance_items(&mut tag, provenance);

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| CodecError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn copy_tags_blocking(
    source: &Path,
    dest: &Path,
    provenance: &Provenance,
    options: ParseOptions,
) -> Result<(), CodecError> {
    let src_tagged = Probe::open(source)
        .and_then(|p| p.options(options).read())
        .map_err(|e| CodecError::Read {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
    let dest_tagged = Probe::open(dest)
        .and_then(|p| p.options(options).read())
        .map_err(|e| CodecError::Write {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut tag = Tag::new(dest_tagged.primary_tag_type());
    if let Some(src_tag) = src_tagged.primary_tag().or_else(|| src_tagged.first_tag()) {
        for item in src_tag.items() {
            if matches!(item.value(), ItemValue::Text(_) | ItemValue::Locator(_)) {
                tag.insert(item.clone());
            }
        }
        for picture in src_tag.pictures() {
            tag.push_picture(picture.clone());
        }
    }
    set_provenance_items(&mut tag, provenance);

    tag.save_to_path(dest, WriteOptions::default())
        .map_err(|e| CodecError::Write {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        })
}

fn set_provenance_items(tag: &mut Tag, provenance: &Provenance) {
    let items = [
        (KEY_FINGERPRINT, &provenance.source_fingerprint),
        (KEY_ENCODER, &provenance.encoder_id),
        (KEY_QUALITY, &provenance.quality),
        (KEY_FORMAT_VERSION, &provenance.format_version),
        (KEY_SOURCE_REL, &provenance.source_rel_path),
    ];
    for (key, value) in items {
        tag.insert(TagItem::new(
            ItemKey::Unknown(key.to_string()),
            ItemValue::Text(value.clone()),
        ));
    }
}

/// Digest of the textual tag metadata in a file, excluding provenance
/// markers. `None` when the file has no readable tags.
///
/// The digest is order-insensitive: items are sorted before hashing so two
/// files with the same tags in a different on-disk order compare equal.
pub fn tags_digest(path: &Path) -> Option<String> {
    let tagged = Probe::open(path)
        .and_then(|p| p.options(ParseOptions::new()).read())
        .ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    Some(digest_tag(tag))
}

fn digest_tag(tag: &Tag) -> String {
    let mut items: Vec<(String, String)> = tag
        .items()
        .filter_map(|item| {
            let text = match item.value() {
                ItemValue::Text(t) | ItemValue::Locator(t) => t.clone(),
                _ => return None,
            };
            let key = format!("{:?}", item.key());
            if key.contains(KEY_PREFIX) {
                return None;
            }
            Some((key, text))
        })
        .collect();
    items.sort();

    let mut hasher = Sha256::new();
    for (key, value) in items {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::tag::{Accessor, TagType};

    #[test]
    fn test_digest_ignores_item_order_and_provenance_keys() {
        let mut a = Tag::new(TagType::VorbisComments);
        a.set_title("Song".to_string());
        a.set_artist("Artist".to_string());

        let mut b = Tag::new(TagType::VorbisComments);
        b.set_artist("Artist".to_string());
        b.set_title("Song".to_string());
        b.insert(TagItem::new(
            ItemKey::Unknown(KEY_FINGERPRINT.to_string()),
            ItemValue::Text("ff".repeat(16)),
        ));

        assert_eq!(digest_tag(&a), digest_tag(&b));
    }

    #[test]
    fn test_digest_changes_with_tag_content() {
        let mut a = Tag::new(TagType::VorbisComments);
        a.set_title("Song".to_string());

        let mut b = Tag::new(TagType::VorbisComments);
        b.set_title("Другая".to_string());

        assert_ne!(digest_tag(&a), digest_tag(&b));
    }

    #[test]
    fn test_set_provenance_items_roundtrip_in_tag() {
        let mut tag = Tag::new(TagType::VorbisComments);
        let provenance = Provenance {
            source_fingerprint: "ab".repeat(16),
            encoder_id: "ffmpeg-libvorbis".to_string(),
            quality: "ogg-192".to_string(),
            format_version: "1".to_string(),
            source_rel_path: "artist/track.flac".to_string(),
        };
        set_provenance_items(&mut tag, &provenance);

        let read = tag
            .get_string(&ItemKey::Unknown(KEY_QUALITY.to_string()))
            .unwrap();
        assert_eq!(read, "ogg-192");
    }
}
