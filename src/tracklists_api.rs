//! Direct access to 1001tracklists search results and tracklist detail pages.

use std::sync::{Arc, OnceLock};

use log::{debug, info};
use regex::Regex;
use scraper::{ElementRef, Html, Node};

use crate::http_fetcher::{FetchError, PageFetcher};
use crate::protocol::{TracklistDocument, TracklistEntry};
use crate::scrapers::html::{element_text, first_attr, first_text, first_text_in, selector};

pub const BASE_URL: &str = "https://www.1001tracklists.com";
const SOURCE_NAME: &str = "1001tracklists";

/// Kind of row on a search results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Tracklist,
    Track,
}

/// One row of a 1001tracklists search results page.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub kind: HitKind,
    pub title: String,
    pub artist: String,
    pub dj: String,
    /// Unsplit "Artist - Title" text of track rows.
    pub full_title: String,
    pub url: String,
    pub genre: String,
}

impl SearchHit {
    /// Scoring view of the hit.
    pub fn to_document(&self) -> TracklistDocument {
        let mut document = TracklistDocument::new(SOURCE_NAME, &self.url);
        document.title = self.title.clone();
        document.artist = if self.artist.is_empty() {
            self.dj.clone()
        } else {
            self.artist.clone()
        };
        document.full_title = self.full_title.clone();
        document.push_genre(&self.genre);
        document
    }
}

/// Metadata of one tracklist detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracklistDetail {
    pub tracklist_id: String,
    pub url: String,
    pub title: String,
    pub tracks: Vec<TracklistEntry>,
    pub cues: Vec<String>,
    pub cover_url: String,
    pub djs: Vec<String>,
    pub genres: Vec<String>,
    pub date_recorded: String,
    /// `(source type, name)` pairs in page order, e.g. `("Festival", "Tomorrowland")`.
    pub sources: Vec<(String, String)>,
    pub num_tracks: usize,
}

impl TracklistDetail {
    /// First source whose type names a festival or event.
    pub fn event(&self) -> Option<&str> {
        self.sources
            .iter()
            .find(|(kind, _)| {
                let kind = kind.to_lowercase();
                kind.contains("festival") || kind.contains("event")
            })
            .map(|(_, name)| name.as_str())
    }
}

pub fn search_url(query: &str) -> String {
    format!("{BASE_URL}/search/result.php?q={}", urlencoding::encode(query))
}

fn absolute(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{BASE_URL}{href}")
    }
}

/// Id segment following `/tracklist/` in a tracklist URL.
pub fn tracklist_id_from_url(url: &str) -> String {
    url.split_once("tracklist/")
        .and_then(|(_, rest)| rest.split('/').next())
        .unwrap_or_default()
        .to_string()
}

fn split_full_title(full_title: &str) -> (String, String) {
    match full_title.split_once(" - ") {
        Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
        None => (String::new(), full_title.trim().to_string()),
    }
}

fn parse_track_row(row: ElementRef<'_>) -> Option<SearchHit> {
    let full_title = first_text_in(row, "span.trackValue")?.replace('\u{a0}', " ");
    let (artist, title) = split_full_title(&full_title);

    let mut genre = String::new();
    let mut url = String::new();
    for meta in row.select(&selector("meta[itemprop]")) {
        let attrs = meta.value();
        let content = attrs.attr("content").unwrap_or_default().trim();
        match attrs.attr("itemprop") {
            Some("genre") if genre.is_empty() => genre = content.to_string(),
            Some("url") if url.is_empty() => url = content.to_string(),
            _ => {}
        }
    }
    Some(SearchHit {
        kind: HitKind::Track,
        title,
        artist,
        dj: String::new(),
        full_title,
        url: if url.is_empty() { url } else { absolute(&url) },
        genre,
    })
}

/// Parses tracklist links followed by track rows from a results page.
pub fn parse_search_results(body: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(body);
    let mut hits = Vec::new();

    let link = selector("a");
    for item in document.select(&selector("div.tlLink")) {
        let Some(anchor) = item.select(&link).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default().trim();
        if href.is_empty() {
            continue;
        }
        hits.push(SearchHit {
            kind: HitKind::Tracklist,
            title: element_text(anchor),
            artist: String::new(),
            dj: first_text_in(item, "span.artistName").unwrap_or_default(),
            full_title: String::new(),
            url: absolute(href),
            genre: String::new(),
        });
    }

    hits.extend(
        document
            .select(&selector("div.tlpItem"))
            .filter_map(parse_track_row),
    );
    hits
}

fn recording_date(left: ElementRef<'_>) -> String {
    let Some(marker) = left
        .select(&selector("span[title=\"tracklist recording date\"]"))
        .next()
    else {
        return String::new();
    };
    marker
        .parent()
        .and_then(|cell| cell.parent())
        .and_then(ElementRef::wrap)
        .and_then(|row| row.select(&selector("td")).nth(1))
        .map(element_text)
        .unwrap_or_default()
}

fn first_own_text(cell: ElementRef<'_>) -> Option<String> {
    cell.children().find_map(|child| match child.value() {
        Node::Text(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        _ => None,
    })
}

fn identified_track_total(text: &str) -> Option<usize> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"IDed\s*\d+\s*/\s*(\d+)").expect("valid IDed pattern"));
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|total| total.as_str().parse().ok())
}

fn parse_left_pane(left: ElementRef<'_>, detail: &mut TracklistDetail) {
    detail.date_recorded = recording_date(left);

    if let Some(styles) = left.select(&selector("td#tl_music_styles")).next() {
        detail.genres = element_text(styles)
            .split(',')
            .map(str::trim)
            .filter(|genre| !genre.is_empty())
            .map(str::to_string)
            .collect();
    }

    let link = selector("a");
    let cell = selector("td");
    for table in left.select(&selector("table.sideTop")) {
        let Some(anchor) = table.select(&link).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default();
        let name = element_text(anchor);
        if href.contains("/dj/") {
            detail.djs.push(name);
        } else if href.contains("/source/") {
            let kind = table
                .select(&cell)
                .next()
                .and_then(first_own_text)
                .unwrap_or_else(|| "source".to_string());
            detail.sources.push((kind, name));
        }
    }

    let pane_text = left.text().collect::<String>();
    detail.num_tracks = identified_track_total(&pane_text).unwrap_or(0);
}

/// Parses a tracklist detail page.
pub fn parse_tracklist_page(url: &str, body: &str) -> TracklistDetail {
    let document = Html::parse_document(body);
    let mut detail = TracklistDetail {
        tracklist_id: tracklist_id_from_url(url),
        url: url.to_string(),
        title: first_text(&document, "title").unwrap_or_default(),
        cover_url: first_attr(&document, "meta[property=\"og:image\"]", "content")
            .unwrap_or_default(),
        ..TracklistDetail::default()
    };

    if let Some(left) = document.select(&selector("div#left")).next() {
        parse_left_pane(left, &mut detail);
    }

    detail.cues = document
        .select(&selector("div.cueValueField"))
        .map(element_text)
        .collect();
    detail.tracks = document
        .select(&selector("div.tlpItem"))
        .filter_map(parse_track_row)
        .enumerate()
        .map(|(index, hit)| TracklistEntry {
            position: index as u32 + 1,
            artist: hit.artist,
            title: hit.title,
            time: detail.cues.get(index).cloned().unwrap_or_default(),
        })
        .collect();
    detail
}

/// Fetching wrapper over the page parsers.
pub struct TracklistsClient {
    fetcher: Arc<dyn PageFetcher>,
}

impl TracklistsClient {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        let body = self.fetcher.fetch_html(&search_url(query))?;
        let hits = parse_search_results(&body);
        info!("1001tracklists: {} results for {}", hits.len(), query);
        Ok(hits)
    }

    pub fn get_tracklist(&self, url: &str) -> Result<TracklistDetail, FetchError> {
        let body = self.fetcher.fetch_html(url)?;
        let detail = parse_tracklist_page(url, &body);
        debug!(
            "1001tracklists: {} has {} djs, {} genres, {} tracks",
            url,
            detail.djs.len(),
            detail.genres.len(),
            detail.num_tracks
        );
        Ok(detail)
    }
}
