//! Writes accepted match metadata and cover art into audio files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::TaggingConfig;
use crate::db_manager::{StoreError, TrackStore};
use crate::http_fetcher::PageFetcher;
use crate::image_pipeline::prepare_cover;
use crate::metadata_tags::{CodecError, TagCodec};
use crate::protocol::{LocalTrack, TagProgress, TrackStatus, TrackTags};

const FILE_NOT_FOUND_MESSAGE: &str = "File not found";

/// Failure of a tagging operation.
#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("track {0} has no accepted match")]
    NotMatched(i64),
}

/// One field that tagging would change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

/// Current file tags next to the tags a write would produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPreview {
    pub track_id: i64,
    pub filename: String,
    pub current: TrackTags,
    pub proposed: TrackTags,
    pub changes: Vec<TagChange>,
}

fn prefer(matched: &str, current: &str) -> String {
    if matched.trim().is_empty() {
        current.to_string()
    } else {
        matched.to_string()
    }
}

/// Matched values where present, the track's current tags otherwise.
fn proposed_tags(track: &LocalTrack) -> TrackTags {
    let Some(matched) = track.matched.as_ref() else {
        return track.tags.clone();
    };
    TrackTags {
        title: prefer(&matched.title, &track.tags.title),
        artist: prefer(&matched.artist, &track.tags.artist),
        album: prefer(&matched.album, &track.tags.album),
        genre: prefer(&matched.genre, &track.tags.genre),
        year: prefer(&matched.year, &track.tags.year),
        has_cover: !matched.cover_url.trim().is_empty(),
    }
}

fn diff_tags(current: &TrackTags, proposed: &TrackTags) -> Vec<TagChange> {
    let mut changes: Vec<TagChange> = [
        ("title", &current.title, &proposed.title),
        ("artist", &current.artist, &proposed.artist),
        ("album", &current.album, &proposed.album),
        ("genre", &current.genre, &proposed.genre),
        ("year", &current.year, &proposed.year),
    ]
    .into_iter()
    .filter(|(_, old_value, new_value)| !new_value.is_empty() && old_value != new_value)
    .map(|(field, old_value, new_value)| TagChange {
        field,
        old_value: old_value.clone(),
        new_value: new_value.clone(),
    })
    .collect();
    if !current.has_cover && proposed.has_cover {
        changes.push(TagChange {
            field: "cover_art",
            old_value: "None".to_string(),
            new_value: "Will be added".to_string(),
        });
    }
    changes
}

pub struct TagManager {
    store: Arc<dyn TrackStore>,
    codec: Arc<dyn TagCodec>,
    fetcher: Arc<dyn PageFetcher>,
    config: TaggingConfig,
    cancel_requested: AtomicBool,
    progress: Mutex<TagProgress>,
}

impl TagManager {
    pub fn new(
        store: Arc<dyn TrackStore>,
        codec: Arc<dyn TagCodec>,
        fetcher: Arc<dyn PageFetcher>,
        config: TaggingConfig,
    ) -> Self {
        Self {
            store,
            codec,
            fetcher,
            config,
            cancel_requested: AtomicBool::new(false),
            progress: Mutex::new(TagProgress::default()),
        }
    }

    /// Lists the changes a write would make without touching the file.
    pub fn preview(&self, track_id: i64) -> Result<TagPreview, TagError> {
        let track = self.store.load_track(track_id)?;
        let current = self.codec.read_tags(&track.path)?;
        let proposed = proposed_tags(&track);
        let changes = diff_tags(&current, &proposed);
        Ok(TagPreview {
            track_id,
            filename: track.filename,
            current,
            proposed,
            changes,
        })
    }

    fn download_cover(&self, track_id: i64, cover_url: &str) -> Option<Vec<u8>> {
        if !self.config.write_cover || cover_url.trim().is_empty() {
            return None;
        }
        let bytes = match self.fetcher.fetch_bytes(cover_url) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(
                    "Tag[track {}]: cover download from {} failed: {}",
                    track_id, cover_url, error
                );
                return None;
            }
        };
        match prepare_cover(
            &bytes,
            self.config.cover_max_edge_px,
            self.config.cover_jpeg_quality,
        ) {
            Ok(cover) => Some(cover),
            Err(error) => {
                warn!(
                    "Tag[track {}]: cover from {} is unusable: {}",
                    track_id, cover_url, error
                );
                None
            }
        }
    }

    fn record_failure(&self, track_id: i64, message: &str) {
        if let Err(error) = self
            .store
            .set_status(track_id, TrackStatus::Error, Some(message))
        {
            warn!(
                "Tag[track {}]: could not record error status: {}",
                track_id, error
            );
        }
    }

    /// Writes matched tags and cover to the file, then marks the track tagged.
    pub fn tag_track(&self, track_id: i64) -> Result<TrackTags, TagError> {
        let track = self.store.load_track(track_id)?;
        let Some(matched) = track.matched.as_ref() else {
            return Err(TagError::NotMatched(track_id));
        };
        info!("Tag[track {}]: tagging {}", track_id, track.filename);

        let proposed = proposed_tags(&track);
        let cover = self.download_cover(track_id, &matched.cover_url);
        if let Err(error) = self
            .codec
            .write_tags(&track.path, &proposed, cover.as_deref())
        {
            let message = match &error {
                CodecError::FileNotFound(_) => FILE_NOT_FOUND_MESSAGE.to_string(),
                other => other.to_string(),
            };
            warn!("Tag[track {}]: {}", track_id, error);
            self.record_failure(track_id, &message);
            return Err(error.into());
        }

        let refreshed = match self.codec.read_tags(&track.path) {
            Ok(tags) => tags,
            Err(error) => {
                warn!(
                    "Tag[track {}]: could not re-read tags after writing: {}",
                    track_id, error
                );
                TrackTags {
                    has_cover: cover.is_some() || track.tags.has_cover,
                    ..proposed
                }
            }
        };
        self.store.update_tags(track_id, &refreshed)?;
        self.store.set_status(track_id, TrackStatus::Tagged, None)?;
        info!("Tag[track {}]: tagged", track_id);
        Ok(refreshed)
    }

    pub fn status_snapshot(&self) -> TagProgress {
        self.progress
            .lock()
            .expect("tag progress lock poisoned")
            .clone()
    }

    /// Stops a running batch after the current track.
    pub fn cancel_batch(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn update_progress<F>(&self, update: F) -> TagProgress
    where
        F: FnOnce(&mut TagProgress),
    {
        let mut progress = self.progress.lock().expect("tag progress lock poisoned");
        update(&mut progress);
        progress.clone()
    }

    /// Tags the given tracks, or every matched track when `track_ids` is empty.
    pub fn batch_tag(&self, track_ids: &[i64]) -> Result<TagProgress, TagError> {
        let ids = if track_ids.is_empty() {
            self.store.list_ids_by_status(TrackStatus::Matched)?
        } else {
            self.store.existing_ids(track_ids)?
        };
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.update_progress(|progress| {
            *progress = TagProgress {
                running: true,
                total: ids.len(),
                ..TagProgress::default()
            };
        });
        info!("Tag batch: {} tracks selected", ids.len());

        for track_id in ids {
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }
            let result = self.tag_track(track_id);
            if let Err(error) = &result {
                warn!("Tag batch: track {} failed: {}", track_id, error);
            }
            self.update_progress(|progress| {
                progress.processed += 1;
                if result.is_ok() {
                    progress.tagged += 1;
                } else {
                    progress.failed += 1;
                }
            });
        }

        let cancelled = self.cancel_requested.load(Ordering::SeqCst);
        let finished = self.update_progress(|progress| {
            progress.running = false;
            progress.cancelled = cancelled;
        });
        info!(
            "Tag batch: tagged {}/{} ({} failed)",
            finished.tagged, finished.total, finished.failed
        );
        Ok(finished)
    }
}
