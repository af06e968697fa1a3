//! Canonical string forms for noisy DJ-set filenames and tags.
//!
//! `normalize` produces the comparison form used by the scorer: boilerplate
//! such as "live", "dj", bitrates and dates is removed so that two spellings of
//! the same set collapse to the same tokens. `search_form` is the lighter form
//! used for search queries, where those words still help the engine.

use std::sync::OnceLock;

use regex::Regex;

const MAX_NORMALIZE_PASSES: usize = 4;
const MIN_SEARCH_TERM_CHARS: usize = 3;

struct NormalizePatterns {
    extension: Regex,
    brackets: Regex,
    dates: Regex,
    separators: Regex,
    part_number: Regex,
    bitrate: Regex,
    boilerplate: Regex,
}

fn patterns() -> &'static NormalizePatterns {
    static PATTERNS: OnceLock<NormalizePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| NormalizePatterns {
        extension: Regex::new(r"\.(mp3|flac|wav|m4a|aac|ogg|opus|aiff?|wma|alac)$")
            .expect("valid extension pattern"),
        brackets: Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").expect("valid bracket pattern"),
        dates: Regex::new(r"\b\d{4}[-./]\d{2}[-./]\d{2}\b|\b\d{2}[-./]\d{2}[-./]\d{4}\b")
            .expect("valid date pattern"),
        separators: Regex::new(r"[_\-\u{2013}\u{2014}]+").expect("valid separator pattern"),
        part_number: Regex::new(r"\b(?:part|pt)\.?\s*\d+\b").expect("valid part pattern"),
        bitrate: Regex::new(r"\b(?:320|256|192|128)(?:\s*kbps)?\b|\bkbps\b|\b(?:flac|wav|mp3)\b")
            .expect("valid bitrate pattern"),
        boilerplate: Regex::new(r"\b(?:live|set|mix|dj|podcast|episode)\b|\b(?:ep|vol)\b\.?|@")
            .expect("valid boilerplate pattern"),
    })
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_extensions(value: &str) -> String {
    let extension = &patterns().extension;
    let mut current = value.trim_end().to_string();
    while extension.is_match(&current) {
        current = extension.replace(&current, "").trim_end().to_string();
    }
    current
}

fn normalize_pass(text: &str) -> String {
    let patterns = patterns();
    let lowered = text.to_lowercase();
    let without_extension = strip_extensions(&lowered);
    let without_brackets = patterns.brackets.replace_all(&without_extension, " ");
    let without_dates = patterns.dates.replace_all(&without_brackets, " ");
    let spaced = patterns.separators.replace_all(&without_dates, " ");
    let without_parts = patterns.part_number.replace_all(&spaced, " ");
    let without_bitrate = patterns.bitrate.replace_all(&without_parts, " ");
    let without_boilerplate = patterns.boilerplate.replace_all(&without_bitrate, " ");
    collapse_whitespace(&without_boilerplate)
}

/// Comparison form of `text`. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut current = normalize_pass(text);
    for _ in 1..MAX_NORMALIZE_PASSES {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Query form of `text`: lowercased, extension and bracketed segments removed,
/// separators turned into spaces.
pub fn search_form(text: &str) -> String {
    let patterns = patterns();
    let lowered = text.to_lowercase();
    let without_extension = strip_extensions(&lowered);
    let without_brackets = patterns.brackets.replace_all(&without_extension, " ");
    let spaced = patterns.separators.replace_all(&without_brackets, " ");
    collapse_whitespace(&spaced)
}

/// Filename without its audio extension, case preserved.
pub fn filename_stem(filename: &str) -> String {
    let trimmed = filename.trim();
    let lowered = trimmed.to_lowercase();
    // Extensions are ASCII, so the removed suffix has the same byte length in both.
    let removed = lowered.len() - strip_extensions(&lowered).len();
    let keep = trimmed.len().saturating_sub(removed);
    if trimmed.is_char_boundary(keep) {
        trimmed[..keep].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derives `(artist, title)` from "Artist - Title" or "Artist @ Event" names.
pub fn split_artist_title(filename: &str) -> (String, String) {
    let stem = filename_stem(filename);
    for separator in [" - ", " @ "] {
        if let Some((artist, title)) = stem.split_once(separator) {
            return (artist.trim().to_string(), title.trim().to_string());
        }
    }
    (String::new(), stem)
}

fn push_term(terms: &mut Vec<String>, term: String) {
    if term.chars().count() >= MIN_SEARCH_TERM_CHARS && !terms.contains(&term) {
        terms.push(term);
    }
}

/// Distinct search terms of at least three characters, most specific first.
pub fn extract_search_terms(artist: &str, title: &str, filename: &str) -> Vec<String> {
    let mut terms = Vec::new();
    push_term(&mut terms, normalize(artist));
    push_term(&mut terms, normalize(title));
    if !filename.trim().is_empty() {
        push_term(&mut terms, search_form(filename));
        push_term(&mut terms, normalize(filename));
        let stem = filename_stem(filename);
        for part in stem.split(" - ").take(2) {
            push_term(&mut terms, normalize(part));
        }
    }
    terms
}
