//! Heuristic tracklist extraction for pages without a dedicated parser.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use scraper::{ElementRef, Html};

use super::cover_art::find_cover_image;
use super::html::{element_text, first_text, selector, text_lines};
use super::Scraper;
use crate::protocol::{TracklistDocument, TracklistEntry};

const MAX_TITLE_CHARS: usize = 200;
const MIN_LINE_CHARS: usize = 5;
const MIN_STRUCTURED_ROWS: usize = 3;
const TRACK_SEPARATORS: [&str; 4] = [" - ", " \u{2013} ", " \u{2014} ", " / "];

struct LinePatterns {
    numbered: Regex,
    timestamped: Regex,
    simple: Regex,
    leading_marker: Regex,
}

fn line_patterns() -> &'static LinePatterns {
    static PATTERNS: OnceLock<LinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LinePatterns {
        numbered: Regex::new(
            r"(?i)^\s*(\d{1,3})[\.\)\]]\s*(.+?)\s*[-\u{2013}\u{2014}]\s*(.+?)(?:\s*[\[\(].+?[\]\)])?$",
        )
        .expect("valid numbered line pattern"),
        timestamped: Regex::new(
            r"(?i)^\s*\[?(\d{1,2}:\d{2}(?::\d{2})?)\]?\s*(.+?)\s*[-\u{2013}\u{2014}]\s*(.+?)$",
        )
        .expect("valid timestamped line pattern"),
        simple: Regex::new(
            r"(?i)^\s*([A-Z][^-\u{2013}\u{2014}\n]{2,40})\s*[-\u{2013}\u{2014}]\s*([^-\u{2013}\u{2014}\n]{3,80})$",
        )
        .expect("valid simple line pattern"),
        leading_marker: Regex::new(r"^\s*(?:\[?\d{1,2}:\d{2}(?::\d{2})?\]?|\d{1,3}[\.\)\]])\s*")
            .expect("valid leading marker pattern"),
    })
}

fn plausible_entry(artist: &str, title: &str) -> bool {
    let artist_len = artist.chars().count();
    let title_len = title.chars().count();
    (2..=100).contains(&artist_len) && (2..=150).contains(&title_len)
}

fn captured(captures: &Captures<'_>, index: usize) -> String {
    captures
        .get(index)
        .map(|found| found.as_str().trim().to_string())
        .unwrap_or_default()
}

fn parse_line(line: &str) -> Option<(String, String, String)> {
    let patterns = line_patterns();
    if let Some(captures) = patterns.numbered.captures(line) {
        return Some((captured(&captures, 2), captured(&captures, 3), String::new()));
    }
    if let Some(captures) = patterns.timestamped.captures(line) {
        return Some((
            captured(&captures, 2),
            captured(&captures, 3),
            captured(&captures, 1),
        ));
    }
    patterns
        .simple
        .captures(line)
        .map(|captures| (captured(&captures, 1), captured(&captures, 2), String::new()))
}

/// Collects distinct "Artist - Title" rows from free text lines.
pub fn extract_entries_from_lines<'a, I>(lines: I) -> Vec<TracklistEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.chars().count() < MIN_LINE_CHARS {
            continue;
        }
        let Some((artist, title, time)) = parse_line(line) else {
            continue;
        };
        if !plausible_entry(&artist, &title) {
            continue;
        }
        let key = format!("{}|{}", artist.to_lowercase(), title.to_lowercase());
        if !seen.insert(key) {
            continue;
        }
        entries.push(TracklistEntry {
            position: entries.len() as u32 + 1,
            artist,
            title,
            time,
        });
    }
    entries
}

/// Splits a loose track string into `(artist, title)`, dropping any leading
/// position number or timestamp.
pub fn parse_track_string(text: &str) -> Option<(String, String)> {
    let stripped = line_patterns().leading_marker.replace(text.trim(), "");
    let stripped = stripped.trim();
    TRACK_SEPARATORS.iter().find_map(|separator| {
        let (artist, title) = stripped.split_once(separator)?;
        let artist = artist.trim();
        let title = title.trim();
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some((artist.to_string(), title.to_string()))
    })
}

fn entries_from_texts<I>(texts: I) -> Vec<TracklistEntry>
where
    I: IntoIterator<Item = String>,
{
    let mut entries = Vec::new();
    for text in texts {
        let Some((artist, title)) = parse_track_string(&text) else {
            continue;
        };
        entries.push(TracklistEntry {
            position: entries.len() as u32 + 1,
            artist,
            title,
            time: String::new(),
        });
    }
    entries
}

fn structured_entries(document: &Html) -> Vec<TracklistEntry> {
    let item = selector("li");
    for list in document.select(&selector("ol")) {
        let items: Vec<ElementRef<'_>> = list.select(&item).collect();
        if items.len() < MIN_STRUCTURED_ROWS {
            continue;
        }
        let entries = entries_from_texts(items.into_iter().map(element_text));
        if !entries.is_empty() {
            return entries;
        }
    }

    let row = selector("tr");
    let cell = selector("td");
    for table in document.select(&selector("table")) {
        let rows: Vec<ElementRef<'_>> = table
            .select(&row)
            .filter(|row| row.select(&cell).count() >= 2)
            .collect();
        if rows.len() < MIN_STRUCTURED_ROWS {
            continue;
        }
        let texts = rows.into_iter().map(|row| {
            let cells: Vec<String> = row.select(&cell).map(element_text).collect();
            cells.join(" - ")
        });
        let entries = entries_from_texts(texts.filter(|text| !text.is_empty()));
        if !entries.is_empty() {
            return entries;
        }
    }
    Vec::new()
}

fn page_title(document: &Html) -> String {
    first_text(document, "h1")
        .or_else(|| first_text(document, "title"))
        .map(|title| title.chars().take(MAX_TITLE_CHARS).collect())
        .unwrap_or_default()
}

/// Fallback parser applied to any page.
pub struct GenericScraper;

impl Scraper for GenericScraper {
    fn source_name(&self) -> &'static str {
        "web"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let body = document
            .select(&selector("body"))
            .next()
            .unwrap_or_else(|| document.root_element());
        let lines = text_lines(body);
        let mut entries = extract_entries_from_lines(lines.iter().map(String::as_str));
        if entries.is_empty() {
            entries = structured_entries(document);
        }
        if entries.is_empty() {
            return None;
        }

        let mut parsed = TracklistDocument::new(self.source_name(), url);
        parsed.title = page_title(document);
        parsed.cover_url = find_cover_image(document, url).unwrap_or_default();
        parsed.entries = entries;
        Some(parsed)
    }
}
