//! Shared domain payloads and event-bus protocol.
//!
//! This module defines the track, tracklist and candidate records exchanged
//! between scanning, matching and tagging, plus the bus messages consumed by
//! the background match worker.

use std::path::PathBuf;

/// Lifecycle status of a library track.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    #[default]
    Pending,
    Matched,
    Tagged,
    Error,
}

impl TrackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Tagged => "tagged",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "matched" => Some(Self::Matched),
            "tagged" => Some(Self::Tagged),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Text tags as read from or written to an audio file.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: String,
    #[serde(default)]
    pub has_cover: bool,
}

/// Technical properties captured while scanning.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TechnicalMetadata {
    pub duration_secs: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub format: String,
    pub file_size: u64,
}

/// Scan output for one audio file, before it receives a store id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDraft {
    pub path: PathBuf,
    pub filename: String,
    pub directory: String,
    pub tags: TrackTags,
    pub technical: TechnicalMetadata,
}

/// Metadata copied from an accepted candidate onto a track.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MatchedFields {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: String,
    pub cover_url: String,
    pub tracklist_url: String,
    pub dj: String,
    pub event: String,
    pub source: String,
    pub confidence: f64,
}

/// A library track known to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub id: i64,
    pub path: PathBuf,
    pub filename: String,
    pub directory: String,
    pub tags: TrackTags,
    pub technical: TechnicalMetadata,
    pub status: TrackStatus,
    pub error_message: Option<String>,
    /// Present once a candidate has been accepted, automatically or by hand.
    pub matched: Option<MatchedFields>,
}

/// One hit returned by a web search provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Host without a leading `www.`.
    pub domain: String,
}

/// One row of a scraped tracklist.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TracklistEntry {
    pub position: u32,
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub time: String,
}

/// Canonical shape every page parser produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracklistDocument {
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub artist: String,
    /// Raw "Artist - Title" string when the source exposes one.
    pub full_title: String,
    pub entries: Vec<TracklistEntry>,
    pub genres: Vec<String>,
    pub date: String,
    pub cover_url: String,
    /// Title and snippet of the search result that led to this page.
    pub search_title: String,
    pub search_snippet: String,
}

impl TracklistDocument {
    pub fn new(source: &str, source_url: &str) -> Self {
        Self {
            source: source.to_string(),
            source_url: source_url.to_string(),
            ..Self::default()
        }
    }

    /// Adds a genre, ignoring blanks and case-insensitive duplicates.
    pub fn push_genre(&mut self, genre: &str) {
        let trimmed = genre.trim();
        if trimmed.is_empty()
            || self
                .genres
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(trimmed))
        {
            return;
        }
        self.genres.push(trimmed.to_string());
    }
}

/// Provenance of a match candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    WebSearch,
    DirectSource,
    DirectFallback,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::DirectSource => "1001tracklists_direct",
            Self::DirectFallback => "1001tracklists_fallback",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "1001tracklists_direct" => Self::DirectSource,
            "1001tracklists_fallback" => Self::DirectFallback,
            _ => Self::WebSearch,
        }
    }
}

/// A scored hypothesis that a track is a given tracklist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchCandidate {
    /// Store row id, set once persisted.
    pub id: Option<i64>,
    pub title: String,
    pub artist: String,
    pub dj: String,
    pub genre: String,
    pub genres: Vec<String>,
    pub cover_url: String,
    pub tracklist_url: String,
    pub tracklist_id: String,
    pub event: String,
    pub date_recorded: String,
    pub source: String,
    pub confidence: f64,
    pub match_type: MatchType,
    pub tracks: Vec<TracklistEntry>,
    pub num_tracks: usize,
}

impl MatchCandidate {
    /// Builds an unscored candidate from a scraped document.
    pub fn from_document(document: &TracklistDocument, match_type: MatchType) -> Self {
        Self {
            id: None,
            title: if document.title.is_empty() {
                document.search_title.clone()
            } else {
                document.title.clone()
            },
            artist: document.artist.clone(),
            dj: document.artist.clone(),
            genre: document.genres.first().cloned().unwrap_or_default(),
            genres: document.genres.clone(),
            cover_url: document.cover_url.clone(),
            tracklist_url: document.source_url.clone(),
            tracklist_id: String::new(),
            event: String::new(),
            date_recorded: document.date.clone(),
            source: document.source.clone(),
            confidence: 0.0,
            match_type,
            tracks: document.entries.clone(),
            num_tracks: document.entries.len(),
        }
    }

    /// Fields copied onto a track when this candidate is accepted.
    pub fn to_matched_fields(&self) -> MatchedFields {
        let artist = if self.artist.is_empty() {
            self.dj.clone()
        } else {
            self.artist.clone()
        };
        MatchedFields {
            title: self.title.clone(),
            artist,
            album: String::new(),
            genre: self.genre.clone(),
            year: year_from_date(&self.date_recorded),
            cover_url: self.cover_url.clone(),
            tracklist_url: self.tracklist_url.clone(),
            dj: self.dj.clone(),
            event: self.event.clone(),
            source: self.source.clone(),
            confidence: self.confidence,
        }
    }
}

fn year_from_date(date: &str) -> String {
    let mut digits = String::with_capacity(4);
    for ch in date.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                return digits;
            }
        } else {
            digits.clear();
        }
    }
    String::new()
}

/// Result of one match run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub track_id: i64,
    pub status: TrackStatus,
    pub matched: Option<MatchedFields>,
    pub candidate_count: usize,
}

/// Which tracks a batch run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelection {
    Ids(Vec<i64>),
    Status(TrackStatus),
}

impl Default for BatchSelection {
    fn default() -> Self {
        Self::Status(TrackStatus::Pending)
    }
}

/// Point-in-time state of a match batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub matched: usize,
    pub pending: usize,
    pub failed: usize,
    pub current_track: Option<i64>,
    pub cancelled: bool,
}

/// Point-in-time state of a tag batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub tagged: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Match(MatchMessage),
}

/// Match-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum MatchMessage {
    RequestMatch { track_id: i64 },
    RequestBatch(BatchSelection),
    CancelBatch,
    RequestProgress,
    MatchFinished(MatchOutcome),
    MatchFailed { track_id: i64, error: String },
    Progress(MatchProgress),
    BatchFinished(MatchProgress),
}
