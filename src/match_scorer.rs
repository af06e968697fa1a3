//! Confidence scoring of tracklist documents against local tracks.
//!
//! A score is the weighted average of fuzzy token-set similarities over the
//! field pairs that are present on both sides. Absent pairs drop out of both
//! the numerator and the denominator, so partial metadata is not penalized.

use std::collections::BTreeSet;

use crate::normalize::normalize;
use crate::protocol::{LocalTrack, TracklistDocument};

const WEB_SEARCH_TITLE_WEIGHT: f64 = 0.4;
const DIRECT_SOURCE_TITLE_WEIGHT: f64 = 0.5;
const ARTIST_WEIGHT: f64 = 0.3;
const FULL_TITLE_WEIGHT: f64 = 0.2;
const TRACK_BONUS_WEIGHT: f64 = 0.1;
const TRACK_BONUS_BASE: f64 = 50.0;
const TRACK_BONUS_PER_TRACK: f64 = 2.0;
const TRACK_BONUS_CAP: f64 = 20.0;

/// Weighting used for a candidate, depending on where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreProfile {
    /// Scraped page reached through a search engine.
    WebSearch,
    /// Hit returned by a tracklist site's own search.
    DirectSource,
}

impl ScoreProfile {
    fn title_weight(self) -> f64 {
        match self {
            Self::WebSearch => WEB_SEARCH_TITLE_WEIGHT,
            Self::DirectSource => DIRECT_SOURCE_TITLE_WEIGHT,
        }
    }

    fn uses_track_bonus(self) -> bool {
        matches!(self, Self::WebSearch)
    }
}

fn similarity_ratio(left: &str, right: &str) -> f64 {
    strsim::normalized_levenshtein(left, right) * 100.0
}

fn join_tokens(head: &str, tail: &[&str]) -> String {
    let tail = tail.join(" ");
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail,
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

/// Order-insensitive similarity on a 0..=100 scale.
///
/// Tokens are split into the shared set and each side's remainder; when one
/// side's tokens are a subset of the other the result is 100.
pub fn token_set_ratio(left: &str, right: &str) -> f64 {
    let left_tokens: BTreeSet<&str> = left.split_whitespace().collect();
    let right_tokens: BTreeSet<&str> = right.split_whitespace().collect();
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }

    let shared: Vec<&str> = left_tokens.intersection(&right_tokens).copied().collect();
    let left_only: Vec<&str> = left_tokens.difference(&right_tokens).copied().collect();
    let right_only: Vec<&str> = right_tokens.difference(&left_tokens).copied().collect();
    if !shared.is_empty() && (left_only.is_empty() || right_only.is_empty()) {
        return 100.0;
    }

    let shared_text = shared.join(" ");
    let left_text = join_tokens(&shared_text, &left_only);
    let right_text = join_tokens(&shared_text, &right_only);
    if shared_text.is_empty() {
        return similarity_ratio(&left_text, &right_text);
    }
    similarity_ratio(&shared_text, &left_text)
        .max(similarity_ratio(&shared_text, &right_text))
        .max(similarity_ratio(&left_text, &right_text))
}

/// Bonus value for a document with `track_count` parsed rows.
pub fn track_bonus(track_count: usize) -> Option<f64> {
    if track_count == 0 {
        return None;
    }
    Some(TRACK_BONUS_BASE + (TRACK_BONUS_PER_TRACK * track_count as f64).min(TRACK_BONUS_CAP))
}

fn push_pair(pairs: &mut Vec<(f64, f64)>, left: &str, right: &str, weight: f64) {
    if !left.is_empty() && !right.is_empty() {
        pairs.push((token_set_ratio(left, right), weight));
    }
}

/// Scores `document` against `track`, returning a value in `[0, 100]`.
pub fn score(track: &LocalTrack, document: &TracklistDocument, profile: ScoreProfile) -> f64 {
    let track_artist = normalize(&track.tags.artist);
    let track_title = if track.tags.title.trim().is_empty() {
        normalize(&track.filename)
    } else {
        normalize(&track.tags.title)
    };
    let track_full = normalize(&track.filename);

    let candidate_title = normalize(&document.title);
    let candidate_artist = normalize(&document.artist);
    let candidate_full = match profile {
        ScoreProfile::DirectSource if !document.full_title.trim().is_empty() => {
            normalize(&document.full_title)
        }
        _ => candidate_title.clone(),
    };

    let mut pairs = Vec::with_capacity(4);
    push_pair(
        &mut pairs,
        &track_title,
        &candidate_title,
        profile.title_weight(),
    );
    push_pair(&mut pairs, &track_artist, &candidate_artist, ARTIST_WEIGHT);
    push_pair(&mut pairs, &track_full, &candidate_full, FULL_TITLE_WEIGHT);
    if profile.uses_track_bonus() {
        if let Some(bonus) = track_bonus(document.entries.len()) {
            pairs.push((bonus, TRACK_BONUS_WEIGHT));
        }
    }

    let total_weight: f64 = pairs.iter().map(|(_, weight)| weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = pairs.iter().map(|(value, weight)| value * weight).sum();
    (weighted / total_weight).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{score, token_set_ratio, track_bonus, ScoreProfile};
    use crate::protocol::{
        LocalTrack, TechnicalMetadata, TrackStatus, TrackTags, TracklistDocument, TracklistEntry,
    };

    fn local_track(artist: &str, title: &str, filename: &str) -> LocalTrack {
        LocalTrack {
            id: 1,
            path: PathBuf::from(format!("/music/{filename}")),
            filename: filename.to_string(),
            directory: "/music".to_string(),
            tags: TrackTags {
                title: title.to_string(),
                artist: artist.to_string(),
                ..TrackTags::default()
            },
            technical: TechnicalMetadata::default(),
            status: TrackStatus::Pending,
            error_message: None,
            matched: None,
        }
    }

    fn document(title: &str, artist: &str, track_count: usize) -> TracklistDocument {
        let mut document = TracklistDocument::new("web", "https://example.com/set");
        document.title = title.to_string();
        document.artist = artist.to_string();
        document.entries = (1..=track_count)
            .map(|position| TracklistEntry {
                position: position as u32,
                artist: "Someone".to_string(),
                title: format!("Track {position}"),
                time: String::new(),
            })
            .collect();
        document
    }

    #[test]
    fn test_token_set_ratio_ignores_order_and_subsets() {
        assert_eq!(token_set_ratio("space closing carl cox", "carl cox space closing"), 100.0);
        assert_eq!(token_set_ratio("snake tomorrowland 2019", "snake at tomorrowland 2019"), 100.0);
        assert_eq!(token_set_ratio("", "anything"), 0.0);
    }

    #[test]
    fn test_token_set_ratio_is_low_for_disjoint_tokens() {
        assert!(token_set_ratio("amelie lens", "kolsch") < 30.0);
    }

    #[test]
    fn test_identical_fields_score_100() {
        let track = local_track("Carl Cox", "Space Closing", "Carl Cox - Space Closing.mp3");
        let candidate = document("Space Closing", "Carl Cox", 0);
        let value = score(&track, &candidate, ScoreProfile::WebSearch);
        assert!((value - 100.0).abs() < 1e-9, "score was {value}");
    }

    #[test]
    fn test_disjoint_fields_score_below_30() {
        let track = local_track("Amelie Lens", "Awakenings Festival", "Amelie Lens - Awakenings.mp3");
        let candidate = document("Boiler Room Berlin", "Kolsch", 0);
        let value = score(&track, &candidate, ScoreProfile::WebSearch);
        assert!(value < 30.0, "score was {value}");
    }

    #[test]
    fn test_missing_candidate_artist_renormalizes_over_present_pairs() {
        let track = local_track("Carl Cox", "Space Closing", "Space Closing.mp3");
        let candidate = document("Space Closing", "", 0);
        let value = score(&track, &candidate, ScoreProfile::WebSearch);
        assert!((value - 100.0).abs() < 1e-9, "score was {value}");
    }

    #[test]
    fn test_no_comparable_pairs_scores_zero() {
        let track = local_track("", "", "");
        let candidate = document("", "", 0);
        assert_eq!(score(&track, &candidate, ScoreProfile::WebSearch), 0.0);
    }

    #[test]
    fn test_track_bonus_grows_with_tracks_and_is_capped() {
        assert_eq!(track_bonus(0), None);
        assert_eq!(track_bonus(4), Some(58.0));
        assert_eq!(track_bonus(10), Some(70.0));
        assert_eq!(track_bonus(20), Some(70.0));
        assert_eq!(track_bonus(80), Some(70.0));
    }

    #[test]
    fn test_direct_source_profile_compares_full_title_and_skips_bonus() {
        let track = local_track("", "", "Adam Beyer - Drumcode 500.mp3");
        let mut candidate = document("Drumcode 500", "Adam Beyer", 3);
        candidate.full_title = "Adam Beyer - Drumcode 500".to_string();
        let direct = score(&track, &candidate, ScoreProfile::DirectSource);
        assert!((direct - 100.0).abs() < 1e-9, "score was {direct}");
    }

    #[test]
    fn test_filename_only_track_scores_high_against_matching_set() {
        let track = local_track("", "", "DJ Snake - Live at Tomorrowland 2019.mp3");
        let candidate = document("DJ Snake Live @ Tomorrowland 2019", "DJ Snake", 12);
        let value = score(&track, &candidate, ScoreProfile::WebSearch);
        assert!(value >= 85.0, "score was {value}");
    }

    #[test]
    fn test_token_set_ratio_uses_edit_distance_on_remainders() {
        // "kolsch" vs "kolsh": one deletion over six characters.
        let value = token_set_ratio("kolsch", "kolsh");
        assert!((value - 100.0 * (1.0 - 1.0 / 6.0)).abs() < 1e-9, "ratio was {value}");
    }

    #[test]
    fn test_long_tracklist_does_not_push_borderline_match_over_threshold() {
        let track = local_track("Carl Cox", "Space Closing", "Carl Cox - Space Closing.mp3");
        let short = score(&track, &document("Space Closing", "Carl Cox", 10), ScoreProfile::WebSearch);
        let long = score(&track, &document("Space Closing", "Carl Cox", 60), ScoreProfile::WebSearch);
        assert!((short - long).abs() < 1e-9, "{short} vs {long}");
    }
}
