//! Library folder walk producing track drafts for the store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::config::LibraryConfig;
use crate::db_manager::{StoreError, TrackStore};
use crate::metadata_tags::TagCodec;
use crate::normalize::split_artist_title;
use crate::protocol::{TrackDraft, TrackTags};

const SECONDS_PER_MINUTE: f64 = 60.0;

pub fn is_supported_audio_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Every supported audio file below `folder_path`, sorted.
pub fn collect_audio_files_from_folder(
    folder_path: &Path,
    extensions: &[String],
    stop: &AtomicBool,
) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut tracks = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() && is_supported_audio_file(&path, extensions) {
                tracks.push(path);
            }
        }
    }

    tracks.sort_unstable();
    tracks
}

/// Point-in-time state of a library scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub current_file: Option<String>,
    pub files_found: usize,
    pub files_added: usize,
    pub files_skipped: usize,
    pub files_filtered: usize,
    pub errors: Vec<String>,
    pub stopped: bool,
}

pub struct LibraryScanner {
    store: Arc<dyn TrackStore>,
    codec: Arc<dyn TagCodec>,
    config: LibraryConfig,
    stop_requested: AtomicBool,
    progress: Mutex<ScanProgress>,
}

impl LibraryScanner {
    pub fn new(store: Arc<dyn TrackStore>, codec: Arc<dyn TagCodec>, config: LibraryConfig) -> Self {
        Self {
            store,
            codec,
            config,
            stop_requested: AtomicBool::new(false),
            progress: Mutex::new(ScanProgress::default()),
        }
    }

    pub fn status_snapshot(&self) -> ScanProgress {
        self.progress
            .lock()
            .expect("scan progress lock poisoned")
            .clone()
    }

    /// Stops a running scan after the current file.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn update_progress<F>(&self, update: F)
    where
        F: FnOnce(&mut ScanProgress),
    {
        let mut progress = self.progress.lock().expect("scan progress lock poisoned");
        update(&mut progress);
    }

    /// Builds a draft from file tags, falling back to "Artist - Title" filenames.
    pub fn read_draft(&self, path: &Path) -> TrackDraft {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let directory = path
            .parent()
            .map(|parent| parent.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut tags = match self.codec.read_tags(path) {
            Ok(tags) => tags,
            Err(error) => {
                warn!("Scan: could not read tags of {}: {}", path.display(), error);
                TrackTags::default()
            }
        };
        let (filename_artist, filename_title) = split_artist_title(&filename);
        if tags.title.trim().is_empty() {
            tags.title = filename_title;
        }
        if tags.artist.trim().is_empty() {
            tags.artist = filename_artist;
        }

        let mut technical = match self.codec.read_properties(path) {
            Ok(technical) => technical,
            Err(error) => {
                debug!("Scan: no properties for {}: {}", path.display(), error);
                Default::default()
            }
        };
        technical.format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_uppercase())
            .unwrap_or_default();
        technical.file_size = std::fs::metadata(path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);

        TrackDraft {
            path: path.to_path_buf(),
            filename,
            directory,
            tags,
            technical,
        }
    }

    fn is_too_short(&self, draft: &TrackDraft) -> bool {
        let min_minutes = self.config.min_duration_minutes;
        if min_minutes == 0 {
            return false;
        }
        draft
            .technical
            .duration_secs
            .is_some_and(|secs| secs < f64::from(min_minutes) * SECONDS_PER_MINUTE)
    }

    fn scan_file(&self, path: &Path) -> Result<ScanAction, StoreError> {
        if self.store.has_path(path)? {
            return Ok(ScanAction::Skipped);
        }
        let draft = self.read_draft(path);
        if self.is_too_short(&draft) {
            debug!("Scan: {} is below the minimum duration", path.display());
            return Ok(ScanAction::Filtered);
        }
        self.store.upsert_draft(&draft)?;
        Ok(ScanAction::Added)
    }

    /// Scans `folders`, or the configured library folders when empty.
    pub fn scan(&self, folders: &[PathBuf]) -> ScanProgress {
        let folders: Vec<PathBuf> = if folders.is_empty() {
            self.config.folders.iter().map(PathBuf::from).collect()
        } else {
            folders.to_vec()
        };
        self.stop_requested.store(false, Ordering::SeqCst);
        self.update_progress(|progress| {
            *progress = ScanProgress {
                running: true,
                ..ScanProgress::default()
            };
        });

        let existing: Vec<PathBuf> = folders
            .into_iter()
            .filter(|folder| {
                let exists = folder.is_dir();
                if !exists {
                    warn!("Scan: directory does not exist, skipping: {}", folder.display());
                }
                exists
            })
            .collect();
        if existing.is_empty() {
            self.update_progress(|progress| {
                progress.running = false;
                progress
                    .errors
                    .push("No valid music directories configured".to_string());
            });
            return self.status_snapshot();
        }

        let mut audio_files = Vec::new();
        for folder in &existing {
            info!("Scan: walking {}", folder.display());
            audio_files.extend(collect_audio_files_from_folder(
                folder,
                &self.config.extensions,
                &self.stop_requested,
            ));
        }
        info!(
            "Scan: found {} audio files in {} folders",
            audio_files.len(),
            existing.len()
        );
        self.update_progress(|progress| {
            progress.total = audio_files.len();
            progress.files_found = audio_files.len();
        });

        for path in &audio_files {
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("Scan: stopped");
                break;
            }
            let display_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string());
            self.update_progress(|progress| progress.current_file = display_name);

            let action = self.scan_file(path);
            self.update_progress(|progress| {
                progress.processed += 1;
                match action {
                    Ok(ScanAction::Added) => progress.files_added += 1,
                    Ok(ScanAction::Skipped) => progress.files_skipped += 1,
                    Ok(ScanAction::Filtered) => progress.files_filtered += 1,
                    Err(error) => {
                        warn!("Scan: failed to add {}: {}", path.display(), error);
                        progress.errors.push(format!("{}: {}", path.display(), error));
                    }
                }
            });
        }

        let stopped = self.stop_requested.load(Ordering::SeqCst);
        self.update_progress(|progress| {
            progress.running = false;
            progress.current_file = None;
            progress.stopped = stopped;
        });
        let finished = self.status_snapshot();
        info!(
            "Scan: {} added, {} already known, {} too short, {} errors",
            finished.files_added,
            finished.files_skipped,
            finished.files_filtered,
            finished.errors.len()
        );
        finished
    }
}

enum ScanAction {
    Added,
    Skipped,
    Filtered,
}
