//! Audio tag and property access backed by `lofty`.

use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};

use crate::protocol::{TechnicalMetadata, TrackTags};

/// Failure of a tag read or write.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read tags from {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to write tags to {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Per-format tag read/write capability.
pub trait TagCodec: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CodecError>;
    /// Duration, bitrate and sample rate; format and size are left to the caller.
    fn read_properties(&self, path: &Path) -> Result<TechnicalMetadata, CodecError>;
    /// Writes the non-empty fields of `tags`, replacing the front cover when given.
    fn write_tags(
        &self,
        path: &Path,
        tags: &TrackTags,
        cover_jpeg: Option<&[u8]>,
    ) -> Result<(), CodecError>;
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    primary_tag
        .into_iter()
        .chain(tags.iter())
        .filter_map(|tag| extractor(tag))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn derive_year_from_date(date: &str) -> String {
    let year: String = date.trim().chars().take(4).collect();
    if year.len() == 4 && year.chars().all(|ch| ch.is_ascii_digit()) {
        year
    } else {
        String::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagCodec;

impl LoftyTagCodec {
    fn open(path: &Path) -> Result<lofty::file::TaggedFile, CodecError> {
        if !path.exists() {
            return Err(CodecError::FileNotFound(path.to_path_buf()));
        }
        read_from_path(path).map_err(|error| CodecError::Read {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }
}

impl TagCodec for LoftyTagCodec {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CodecError> {
        let tagged_file = Self::open(path)?;
        let primary_tag = tagged_file.primary_tag();
        let tags = tagged_file.tags();

        let title = first_non_empty_value(primary_tag, tags, |tag| {
            tag.title().map(|value| value.into_owned())
        });
        let artist = first_non_empty_value(primary_tag, tags, |tag| {
            tag.artist().map(|value| value.into_owned())
        });
        let album = first_non_empty_value(primary_tag, tags, |tag| {
            tag.album().map(|value| value.into_owned())
        });
        let genre = first_non_empty_value(primary_tag, tags, |tag| {
            tag.genre().map(|value| value.into_owned())
        });
        let year = {
            let direct_year = first_non_empty_value(primary_tag, tags, |tag| {
                tag.get_string(ItemKey::Year).map(str::to_string)
            });
            if direct_year.is_empty() {
                let date = first_non_empty_value(primary_tag, tags, |tag| {
                    tag.get_string(ItemKey::RecordingDate).map(str::to_string)
                });
                derive_year_from_date(&date)
            } else {
                direct_year
            }
        };
        let has_cover = primary_tag
            .into_iter()
            .chain(tags.iter())
            .any(|tag| !tag.pictures().is_empty());

        Ok(TrackTags {
            title,
            artist,
            album,
            genre,
            year,
            has_cover,
        })
    }

    fn read_properties(&self, path: &Path) -> Result<TechnicalMetadata, CodecError> {
        let tagged_file = Self::open(path)?;
        let properties = tagged_file.properties();
        let duration = properties.duration();
        Ok(TechnicalMetadata {
            duration_secs: (!duration.is_zero()).then(|| duration.as_secs_f64()),
            bitrate_kbps: properties.audio_bitrate(),
            sample_rate_hz: properties.sample_rate(),
            ..TechnicalMetadata::default()
        })
    }

    fn write_tags(
        &self,
        path: &Path,
        tags: &TrackTags,
        cover_jpeg: Option<&[u8]>,
    ) -> Result<(), CodecError> {
        let write_error = |message: String| CodecError::Write {
            path: path.to_path_buf(),
            message,
        };
        let mut tagged_file = Self::open(path)?;
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| write_error(format!("no writable tag available for {tag_type:?}")))?;

        let title = tags.title.trim();
        if !title.is_empty() {
            tag.set_title(title.to_string());
        }
        let artist = tags.artist.trim();
        if !artist.is_empty() {
            tag.set_artist(artist.to_string());
        }
        let album = tags.album.trim();
        if !album.is_empty() {
            tag.set_album(album.to_string());
        }
        let genre = tags.genre.trim();
        if !genre.is_empty() {
            tag.set_genre(genre.to_string());
        }
        let year = tags.year.trim();
        if !year.is_empty() {
            tag.remove_key(ItemKey::Year);
            tag.insert_text(ItemKey::Year, year.to_string());
        }
        if let Some(cover) = cover_jpeg {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(
                Picture::unchecked(cover.to_vec())
                    .pic_type(PictureType::CoverFront)
                    .mime_type(MimeType::Jpeg)
                    .build(),
            );
        }

        tag.remove_empty();
        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|error| write_error(error.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{derive_year_from_date, CodecError, LoftyTagCodec, TagCodec};
    use crate::protocol::TrackTags;

    fn temp_wav(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "djset-tagger-{}-{}-{}.wav",
            name,
            std::process::id(),
            nanos
        ));
        let sample_rate: u32 = 8_000;
        let samples: Vec<u8> = vec![0; 1_600];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + samples.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&samples);
        std::fs::write(&path, bytes).expect("write wav fixture");
        path
    }

    #[test]
    fn test_derive_year_from_date_with_full_value() {
        assert_eq!(derive_year_from_date("1998-10-31"), "1998");
    }

    #[test]
    fn test_derive_year_from_date_rejects_short_or_non_numeric_values() {
        assert_eq!(derive_year_from_date("99"), "");
        assert_eq!(derive_year_from_date("Summer 2019"), "");
    }

    #[test]
    fn test_missing_file_is_reported_as_not_found() {
        let result = LoftyTagCodec.read_tags(std::path::Path::new("/nonexistent/set.mp3"));
        assert!(matches!(result, Err(CodecError::FileNotFound(_))));
    }

    #[test]
    fn test_written_tags_are_read_back() {
        let path = temp_wav("roundtrip");
        let written = TrackTags {
            title: "Live @ Awakenings".to_string(),
            artist: "Amelie Lens".to_string(),
            genre: "Techno".to_string(),
            year: "2019".to_string(),
            ..TrackTags::default()
        };
        LoftyTagCodec
            .write_tags(&path, &written, None)
            .expect("write tags");

        let read = LoftyTagCodec.read_tags(&path).expect("read tags");
        assert_eq!(read.title, "Live @ Awakenings");
        assert_eq!(read.artist, "Amelie Lens");
        assert_eq!(read.genre, "Techno");
        assert!(!read.has_cover);

        let properties = LoftyTagCodec.read_properties(&path).expect("properties");
        assert_eq!(properties.sample_rate_hz, Some(8_000));
        let _ = std::fs::remove_file(&path);
    }
}
