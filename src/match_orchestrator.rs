//! Match discovery, ranking and acceptance for library tracks.
//!
//! A run moves a track from `pending` to `matched`, back to `pending` when
//! nothing is good enough, or to `error` when the store fails. Web search
//! results are tried first; the 1001tracklists search is the fallback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::candidate_generator::CandidateGenerator;
use crate::config::MatchingConfig;
use crate::db_manager::{StoreError, TrackStore};
use crate::http_fetcher::FetchError;
use crate::match_scorer::{score, ScoreProfile};
use crate::normalize::{extract_search_terms, normalize, split_artist_title};
use crate::protocol::{
    BatchSelection, LocalTrack, MatchCandidate, MatchOutcome, MatchProgress, MatchType,
    MatchedFields, TrackStatus, TracklistDocument,
};
use crate::tracklists_api::{tracklist_id_from_url, SearchHit, TracklistDetail, TracklistsClient};

const MIN_PRIMARY_CANDIDATES: usize = 2;
const MAX_FALLBACK_QUERIES: usize = 3;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Failure of a match operation.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("track {0} not found")]
    TrackNotFound(i64),
    #[error("candidate {0} not found")]
    CandidateNotFound(i64),
    #[error("candidate {candidate_id} does not belong to track {track_id}")]
    CandidateMismatch { track_id: i64, candidate_id: i64 },
    #[error("a match run is already in progress for track {0}")]
    AlreadyRunning(i64),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MatchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::TrackNotFound(track_id) => Self::TrackNotFound(track_id),
            StoreError::CandidateNotFound(candidate_id) => Self::CandidateNotFound(candidate_id),
            other => Self::Store(other),
        }
    }
}

/// Web-search backed document discovery.
pub trait CandidateSource: Send + Sync {
    fn find_candidates(
        &self,
        artist: &str,
        title: &str,
        filename: &str,
        max_results: usize,
    ) -> Result<Vec<TracklistDocument>, FetchError>;
}

impl CandidateSource for CandidateGenerator {
    fn find_candidates(
        &self,
        artist: &str,
        title: &str,
        filename: &str,
        max_results: usize,
    ) -> Result<Vec<TracklistDocument>, FetchError> {
        CandidateGenerator::find_candidates(self, artist, title, filename, max_results)
    }
}

/// Site search and detail pages of the best-known tracklist source.
pub trait DirectSource: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError>;
    fn get_tracklist(&self, url: &str) -> Result<TracklistDetail, FetchError>;
}

impl DirectSource for TracklistsClient {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        TracklistsClient::search(self, query)
    }

    fn get_tracklist(&self, url: &str) -> Result<TracklistDetail, FetchError> {
        TracklistsClient::get_tracklist(self, url)
    }
}

struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    track_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight set lock poisoned")
            .remove(&self.track_id);
    }
}

fn content_key(candidate: &MatchCandidate) -> String {
    format!(
        "{}|{}",
        normalize(&candidate.title),
        normalize(if candidate.artist.is_empty() {
            &candidate.dj
        } else {
            &candidate.artist
        })
    )
}

/// Runs single-track and batch matching against the shared store.
pub struct MatchOrchestrator {
    store: Arc<dyn TrackStore>,
    candidates: Arc<dyn CandidateSource>,
    direct: Arc<dyn DirectSource>,
    config: MatchingConfig,
    max_documents: usize,
    in_flight: Mutex<HashSet<i64>>,
    cancel_requested: AtomicBool,
    progress: Mutex<MatchProgress>,
}

impl MatchOrchestrator {
    pub fn new(
        store: Arc<dyn TrackStore>,
        candidates: Arc<dyn CandidateSource>,
        direct: Arc<dyn DirectSource>,
        config: MatchingConfig,
        max_documents: usize,
    ) -> Self {
        Self {
            store,
            candidates,
            direct,
            config,
            max_documents: max_documents.max(1),
            in_flight: Mutex::new(HashSet::new()),
            cancel_requested: AtomicBool::new(false),
            progress: Mutex::new(MatchProgress::default()),
        }
    }

    fn claim(&self, track_id: i64) -> Result<InFlightGuard<'_>, MatchError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set lock poisoned");
        if !in_flight.insert(track_id) {
            return Err(MatchError::AlreadyRunning(track_id));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            track_id,
        })
    }

    /// Finds, ranks and persists candidates for one track.
    pub fn run_match(&self, track_id: i64) -> Result<MatchOutcome, MatchError> {
        let _guard = self.claim(track_id)?;
        let track = self.store.load_track(track_id)?;

        let terms = extract_search_terms(&track.tags.artist, &track.tags.title, &track.filename);
        if terms.is_empty() {
            warn!("Match[track {}]: no usable search terms", track_id);
            return Ok(MatchOutcome {
                track_id,
                status: track.status,
                matched: track.matched.clone(),
                candidate_count: 0,
            });
        }
        info!("Match[track {}]: search terms {:?}", track_id, terms);

        let mut candidates = self.discover(&track, &terms);
        self.enrich(track_id, &mut candidates);

        match self.apply_candidates(&track, candidates) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let message = error.to_string();
                if let Err(status_error) =
                    self.store
                        .set_status(track_id, TrackStatus::Error, Some(&message))
                {
                    warn!(
                        "Match[track {}]: could not record error status: {}",
                        track_id, status_error
                    );
                }
                Err(error)
            }
        }
    }

    fn query_identity(track: &LocalTrack) -> (String, String) {
        if track.tags.artist.trim().is_empty() && track.tags.title.trim().is_empty() {
            split_artist_title(&track.filename)
        } else {
            (track.tags.artist.clone(), track.tags.title.clone())
        }
    }

    fn discover(&self, track: &LocalTrack, terms: &[String]) -> Vec<MatchCandidate> {
        let (artist, title) = Self::query_identity(track);
        let mut accepted = Vec::new();

        match self
            .candidates
            .find_candidates(&artist, &title, &track.filename, self.max_documents)
        {
            Ok(documents) => {
                debug!(
                    "Match[track {}]: {} documents from web search",
                    track.id,
                    documents.len()
                );
                for document in &documents {
                    let confidence = score(track, document, ScoreProfile::WebSearch);
                    debug!(
                        "Match[track {}]: {:.1} for {} ({:?})",
                        track.id, confidence, document.source_url, document.search_snippet
                    );
                    if confidence >= self.config.fuzzy_threshold {
                        let mut candidate =
                            MatchCandidate::from_document(document, MatchType::WebSearch);
                        candidate.confidence = confidence;
                        accepted.push(candidate);
                    }
                }
                if accepted.len() < MIN_PRIMARY_CANDIDATES {
                    let limit = self.config.fallback_queries.min(MAX_FALLBACK_QUERIES);
                    self.search_direct(track, terms, limit, MatchType::DirectSource, &mut accepted);
                }
            }
            Err(error) => {
                warn!(
                    "Match[track {}]: web search failed ({}), using 1001tracklists only",
                    track.id, error
                );
                self.search_direct(
                    track,
                    terms,
                    MAX_FALLBACK_QUERIES,
                    MatchType::DirectFallback,
                    &mut accepted,
                );
            }
        }

        // Stable, so equal scores keep discovery order.
        accepted.sort_by(|left, right| right.confidence.total_cmp(&left.confidence));
        accepted.truncate(self.config.max_candidates);
        accepted
    }

    fn search_direct(
        &self,
        track: &LocalTrack,
        terms: &[String],
        limit: usize,
        match_type: MatchType,
        accepted: &mut Vec<MatchCandidate>,
    ) {
        let mut seen_urls: HashSet<String> = accepted
            .iter()
            .map(|candidate| candidate.tracklist_url.clone())
            .filter(|url| !url.is_empty())
            .collect();
        let mut seen_content: HashSet<String> = accepted.iter().map(content_key).collect();

        for (index, term) in terms.iter().take(limit).enumerate() {
            if index > 0 {
                std::thread::sleep(Duration::from_millis(self.config.direct_query_delay_ms));
            }
            let hits = match self.direct.search(term) {
                Ok(hits) => hits,
                Err(error) => {
                    warn!(
                        "Match[track {}]: 1001tracklists search for {:?} failed: {}",
                        track.id, term, error
                    );
                    continue;
                }
            };
            for hit in hits {
                if !hit.url.is_empty() && !seen_urls.insert(hit.url.clone()) {
                    continue;
                }
                let document = hit.to_document();
                let confidence = score(track, &document, ScoreProfile::DirectSource);
                if confidence < self.config.fuzzy_threshold {
                    continue;
                }
                let mut candidate = MatchCandidate::from_document(&document, match_type);
                candidate.confidence = confidence;
                candidate.dj = if hit.dj.is_empty() {
                    document.artist.clone()
                } else {
                    hit.dj.clone()
                };
                candidate.tracklist_id = tracklist_id_from_url(&hit.url);
                if !seen_content.insert(content_key(&candidate)) {
                    continue;
                }
                accepted.push(candidate);
            }
        }
    }

    fn enrich(&self, track_id: i64, candidates: &mut [MatchCandidate]) {
        for candidate in candidates.iter_mut().take(self.config.enrich_top) {
            if !candidate.tracklist_url.contains("/tracklist/") {
                continue;
            }
            match self.direct.get_tracklist(&candidate.tracklist_url) {
                Ok(detail) => merge_detail(candidate, detail),
                Err(error) => warn!(
                    "Match[track {}]: could not enrich {}: {}",
                    track_id, candidate.tracklist_url, error
                ),
            }
        }
    }

    /// Persists a ranked candidate list and applies the acceptance decision.
    pub fn apply_candidates(
        &self,
        track: &LocalTrack,
        mut candidates: Vec<MatchCandidate>,
    ) -> Result<MatchOutcome, MatchError> {
        if candidates.is_empty() {
            info!("Match[track {}]: no candidates found", track.id);
            self.store.set_status(track.id, TrackStatus::Pending, None)?;
            return Ok(MatchOutcome {
                track_id: track.id,
                status: TrackStatus::Pending,
                matched: track.matched.clone(),
                candidate_count: 0,
            });
        }

        let ids = self.store.replace_candidates(track.id, &candidates)?;
        for (candidate, id) in candidates.iter_mut().zip(ids) {
            candidate.id = Some(id);
        }

        let best = &candidates[0];
        let outcome = if best.confidence >= self.config.auto_accept_threshold {
            let fields = best.to_matched_fields();
            self.store.set_matched(track.id, &fields)?;
            info!(
                "Match[track {}]: auto-accepted {:?} at {:.1}",
                track.id, best.title, best.confidence
            );
            MatchOutcome {
                track_id: track.id,
                status: TrackStatus::Matched,
                matched: Some(fields),
                candidate_count: candidates.len(),
            }
        } else {
            self.store.set_status(track.id, TrackStatus::Pending, None)?;
            info!(
                "Match[track {}]: best score {:.1} needs review",
                track.id, best.confidence
            );
            MatchOutcome {
                track_id: track.id,
                status: TrackStatus::Pending,
                matched: track.matched.clone(),
                candidate_count: candidates.len(),
            }
        };
        Ok(outcome)
    }

    /// Accepts a stored candidate by hand.
    pub fn select_candidate(
        &self,
        track_id: i64,
        candidate_id: i64,
    ) -> Result<MatchedFields, MatchError> {
        let (owner, candidate) = self.store.load_candidate(candidate_id)?;
        if owner != track_id {
            return Err(MatchError::CandidateMismatch {
                track_id,
                candidate_id,
            });
        }
        let fields = candidate.to_matched_fields();
        self.store.set_matched(track_id, &fields)?;
        info!(
            "Match[track {}]: selected candidate {} ({:?})",
            track_id, candidate_id, candidate.title
        );
        Ok(fields)
    }

    pub fn candidates_for_track(&self, track_id: i64) -> Result<Vec<MatchCandidate>, MatchError> {
        Ok(self.store.candidates_for_track(track_id)?)
    }

    pub fn status_snapshot(&self) -> MatchProgress {
        self.progress
            .lock()
            .expect("match progress lock poisoned")
            .clone()
    }

    /// Stops a running batch after the current track.
    pub fn cancel_batch(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn update_progress<F>(&self, update: F) -> MatchProgress
    where
        F: FnOnce(&mut MatchProgress),
    {
        let mut progress = self.progress.lock().expect("match progress lock poisoned");
        update(&mut progress);
        progress.clone()
    }

    /// Sleeps for `delay`, returning early with `false` when a cancel arrives.
    fn pause_between_tracks(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(CANCEL_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn resolve_selection(&self, selection: &BatchSelection) -> Result<Vec<i64>, MatchError> {
        let ids = match selection {
            BatchSelection::Ids(ids) => self.store.existing_ids(ids)?,
            BatchSelection::Status(status) => self.store.list_ids_by_status(*status)?,
        };
        Ok(ids)
    }

    pub fn run_batch(&self, selection: BatchSelection) -> Result<MatchProgress, MatchError> {
        self.run_batch_with(selection, |_| {})
    }

    /// Matches every selected track in turn, reporting progress after each one.
    pub fn run_batch_with<F>(
        &self,
        selection: BatchSelection,
        mut on_progress: F,
    ) -> Result<MatchProgress, MatchError>
    where
        F: FnMut(&MatchProgress),
    {
        let track_ids = self.resolve_selection(&selection)?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        let started = self.update_progress(|progress| {
            *progress = MatchProgress {
                running: true,
                total: track_ids.len(),
                ..MatchProgress::default()
            };
        });
        info!("Match batch: {} tracks selected", track_ids.len());
        on_progress(&started);

        let inter_track_delay = Duration::from_millis(self.config.inter_track_delay_ms);
        for (index, &track_id) in track_ids.iter().enumerate() {
            if index > 0 && !self.pause_between_tracks(inter_track_delay) {
                break;
            }
            if self.is_cancelled() {
                break;
            }
            self.update_progress(|progress| progress.current_track = Some(track_id));

            let result = self.run_match(track_id);
            let snapshot = self.update_progress(|progress| {
                progress.processed += 1;
                match &result {
                    Ok(outcome) if outcome.status == TrackStatus::Matched => progress.matched += 1,
                    Ok(_) => progress.pending += 1,
                    Err(_) => progress.failed += 1,
                }
            });
            if let Err(error) = result {
                warn!("Match batch: track {} failed: {}", track_id, error);
            }
            on_progress(&snapshot);
        }

        let cancelled = self.is_cancelled();
        let finished = self.update_progress(|progress| {
            progress.running = false;
            progress.current_track = None;
            progress.cancelled = cancelled;
        });
        info!(
            "Match batch: processed {}/{} ({} matched, {} pending, {} failed{})",
            finished.processed,
            finished.total,
            finished.matched,
            finished.pending,
            finished.failed,
            if cancelled { ", cancelled" } else { "" }
        );
        Ok(finished)
    }
}

fn merge_detail(candidate: &mut MatchCandidate, detail: TracklistDetail) {
    if let Some(event) = detail.event() {
        candidate.event = event.to_string();
    }
    if !detail.cover_url.is_empty() {
        candidate.cover_url = detail.cover_url;
    }
    if let Some(dj) = detail.djs.first() {
        candidate.dj = dj.clone();
    }
    if let Some(genre) = detail.genres.first() {
        candidate.genre = genre.clone();
        candidate.genres = detail.genres;
    }
    if !detail.date_recorded.is_empty() {
        candidate.date_recorded = detail.date_recorded;
    }
    if !detail.tracklist_id.is_empty() {
        candidate.tracklist_id = detail.tracklist_id;
    }
    if detail.num_tracks > 0 {
        candidate.num_tracks = detail.num_tracks;
    }
    if candidate.tracks.is_empty() && !detail.tracks.is_empty() {
        if candidate.num_tracks == 0 {
            candidate.num_tracks = detail.tracks.len();
        }
        candidate.tracks = detail.tracks;
    }
}
