//! Parsers for known tracklist-hosting sites.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use super::cover_art::find_cover_image;
use super::generic::{extract_entries_from_lines, parse_track_string};
use super::html::{element_text, first_attr, first_text, first_text_in, selector, text_lines};
use super::Scraper;
use crate::protocol::{TracklistDocument, TracklistEntry};

const MAX_PAGE_GENRES: usize = 5;
const MIN_TRACK_TEXT_CHARS: usize = 5;

fn finish(document: TracklistDocument) -> Option<TracklistDocument> {
    if document.entries.is_empty() {
        None
    } else {
        Some(document)
    }
}

fn start_document(source: &str, document: &Html, url: &str) -> TracklistDocument {
    let mut parsed = TracklistDocument::new(source, url);
    parsed.cover_url = find_cover_image(document, url).unwrap_or_default();
    parsed
}

fn push_genres_from(parsed: &mut TracklistDocument, document: &Html, css: &str) {
    for genre in document
        .select(&selector(css))
        .take(MAX_PAGE_GENRES)
        .map(element_text)
    {
        parsed.push_genre(&genre);
    }
}

fn titled_entries<I>(artist: &str, titles: I) -> Vec<TracklistEntry>
where
    I: IntoIterator<Item = String>,
{
    titles
        .into_iter()
        .filter(|title| !title.is_empty())
        .enumerate()
        .map(|(index, title)| TracklistEntry {
            position: index as u32 + 1,
            artist: artist.to_string(),
            title,
            time: String::new(),
        })
        .collect()
}

fn description_artist(description: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^([^-\u{2013}]+)\s*[-\u{2013}]").expect("valid description pattern")
    });
    pattern
        .captures(description.trim())
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim().to_string())
        .filter(|artist| !artist.is_empty())
}

/// Tracklist pages on 1001tracklists.com.
pub struct TracklistsPageScraper;

impl TracklistsPageScraper {
    fn row_entry(row: ElementRef<'_>, position: u32) -> Option<TracklistEntry> {
        let text = first_text_in(row, "span.trackValue, a.trackValue, div.trackTitle")?;
        let (artist, title) = match text.split_once(" - ") {
            Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
            None => (String::new(), text),
        };
        Some(TracklistEntry {
            position,
            artist,
            title,
            time: first_text_in(row, "span.cueValueField, span.timeValue").unwrap_or_default(),
        })
    }
}

impl Scraper for TracklistsPageScraper {
    fn source_name(&self) -> &'static str {
        "1001tracklists"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.title = first_text(document, "h1#pageTitle, h1.tlTitle")
            .or_else(|| first_attr(document, "meta[property=\"og:title\"]", "content"))
            .unwrap_or_default();
        parsed.artist = first_attr(document, "meta[name=\"description\"]", "content")
            .and_then(|description| description_artist(&description))
            .unwrap_or_default();

        let rows = selector("div.tlpItem, div.trackItem, tr.tlpItem");
        for row in document.select(&rows) {
            let position = parsed.entries.len() as u32 + 1;
            if let Some(entry) = Self::row_entry(row, position) {
                parsed.entries.push(entry);
            }
        }

        push_genres_from(&mut parsed, document, "a[href*=\"/genre/\"]");
        parsed.date = first_text(document, "span.recording-date, div.dateDiv").unwrap_or_default();
        finish(parsed)
    }
}

/// Mix pages on mixesdb.com.
pub struct MixesDbScraper;

impl MixesDbScraper {
    fn tracklist_container(document: &Html) -> Option<ElementRef<'_>> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"(?i)Tracklist|Track\s*list").expect("valid heading pattern"));
        let heading = document.tree.root().descendants().find(|node| {
            matches!(node.value(), Node::Text(text) if pattern.is_match(text))
        })?;
        heading
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|element| matches!(element.value().name(), "div" | "section" | "table"))
    }
}

impl Scraper for MixesDbScraper {
    fn source_name(&self) -> &'static str {
        "mixesdb"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.title = first_text(document, "h1.firstHeading, h1").unwrap_or_default();

        let container = Self::tracklist_container(document)?;
        for item in container.select(&selector("li, tr")) {
            let text = element_text(item);
            if text.chars().count() <= MIN_TRACK_TEXT_CHARS {
                continue;
            }
            if let Some((artist, title)) = parse_track_string(&text) {
                parsed.entries.push(TracklistEntry {
                    position: parsed.entries.len() as u32 + 1,
                    artist,
                    title,
                    time: String::new(),
                });
            }
        }
        finish(parsed)
    }
}

/// Release pages on discogs.com.
pub struct DiscogsScraper;

impl Scraper for DiscogsScraper {
    fn source_name(&self) -> &'static str {
        "discogs"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.title = first_text(document, "h1").unwrap_or_default();
        parsed.artist = first_text(document, "a[href*=\"/artist/\"]").unwrap_or_default();

        let rows = selector("tr.tracklist_track");
        let title_cell = selector("span[class*=\"trackTitle\"], td.trackTitle");
        let titles = document
            .select(&rows)
            .filter_map(|row| row.select(&title_cell).next().map(element_text));
        parsed.entries = titled_entries(&parsed.artist, titles);

        push_genres_from(
            &mut parsed,
            document,
            "a[href*=\"/genre/\"], a[href*=\"/style/\"]",
        );
        finish(parsed)
    }
}

/// Release pages on musicbrainz.org.
pub struct MusicBrainzScraper;

impl Scraper for MusicBrainzScraper {
    fn source_name(&self) -> &'static str {
        "musicbrainz"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.title = first_text(document, "h1 bdi, h1").unwrap_or_default();
        parsed.artist =
            first_text(document, "p.subheader a[href*=\"/artist/\"]").unwrap_or_default();

        let rows = selector("table.medium tbody tr");
        let title_cell = selector("td.title a bdi");
        let titles = document
            .select(&rows)
            .filter_map(|row| row.select(&title_cell).next().map(element_text));
        parsed.entries = titled_entries(&parsed.artist, titles);
        finish(parsed)
    }
}

/// Posts on reddit.com whose body lists tracks.
pub struct RedditScraper;

impl Scraper for RedditScraper {
    fn source_name(&self) -> &'static str {
        "reddit"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.title =
            first_text(document, "h1, [data-testid=\"post-title\"]").unwrap_or_default();

        let content = document
            .select(&selector(
                "[data-testid=\"post-content\"], div.md, div.usertext-body",
            ))
            .next()?;
        let lines = text_lines(content);
        parsed.entries = extract_entries_from_lines(lines.iter().map(String::as_str));
        finish(parsed)
    }
}

/// Concert setlists on setlist.fm.
pub struct SetlistFmScraper;

impl Scraper for SetlistFmScraper {
    fn source_name(&self) -> &'static str {
        "setlistfm"
    }

    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument> {
        let mut parsed = start_document(self.source_name(), document, url);
        parsed.artist = first_text(document, "h1 a[href*=\"/setlists/\"]").unwrap_or_default();

        let venue = first_text(document, "a[href*=\"/venue/\"]");
        let date = first_text(document, "span.dateString");
        parsed.date = date.clone().unwrap_or_default();
        parsed.title = [venue, date]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" @ ");

        let song_label = selector("li.song a.songLabel");
        let songs = document.select(&song_label).map(element_text);
        parsed.entries = titled_entries(&parsed.artist, songs);
        finish(parsed)
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::{
        DiscogsScraper, MixesDbScraper, MusicBrainzScraper, RedditScraper, SetlistFmScraper,
        TracklistsPageScraper,
    };
    use crate::scrapers::Scraper;

    #[test]
    fn test_tracklists_page_reads_rows_artist_and_genres() {
        let html = Html::parse_document(
            "<html><head>\
             <meta name=\"description\" content=\"Carl Cox - Space Closing Party 2011\">\
             <meta property=\"og:image\" content=\"https://cdn.1001tracklists.com/c.jpg\">\
             </head><body>\
             <h1 id=\"pageTitle\">Carl Cox @ Space Closing Party, Ibiza 2011-10-04</h1>\
             <a href=\"/genre/techno/index.html\">Techno</a>\
             <a href=\"/genre/tech-house/index.html\">Tech House</a>\
             <span class=\"recording-date\">2011-10-04</span>\
             <div class=\"tlpItem\"><span class=\"cueValueField\">00:00</span>\
             <span class=\"trackValue\">Joris Voorn - Incident</span></div>\
             <div class=\"tlpItem\"><span class=\"trackValue\">ID - ID</span></div>\
             <div class=\"tlpItem\"><span class=\"other\">ad slot</span></div>\
             </body></html>",
        );
        let parsed = TracklistsPageScraper
            .parse(&html, "https://www.1001tracklists.com/tracklist/1x/carl-cox.html")
            .expect("tracklist");
        assert_eq!(parsed.source, "1001tracklists");
        assert_eq!(parsed.title, "Carl Cox @ Space Closing Party, Ibiza 2011-10-04");
        assert_eq!(parsed.artist, "Carl Cox");
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].time, "00:00");
        assert_eq!(parsed.entries[0].artist, "Joris Voorn");
        assert_eq!(parsed.genres, vec!["Techno", "Tech House"]);
        assert_eq!(parsed.date, "2011-10-04");
        assert_eq!(parsed.cover_url, "https://cdn.1001tracklists.com/c.jpg");
    }

    #[test]
    fn test_tracklists_page_uses_og_title_when_heading_missing() {
        let html = Html::parse_document(
            "<head><meta property=\"og:title\" content=\"Solomun @ Pacha\"></head>\
             <body><div class=\"trackItem\"><div class=\"trackTitle\">Solomun - Customs</div></div></body>",
        );
        let parsed = TracklistsPageScraper
            .parse(&html, "https://www.1001tracklists.com/tracklist/2y/x.html")
            .expect("tracklist");
        assert_eq!(parsed.title, "Solomun @ Pacha");
    }

    #[test]
    fn test_tracklists_page_without_rows_is_rejected() {
        let html = Html::parse_document("<h1 id=\"pageTitle\">Empty</h1>");
        assert!(TracklistsPageScraper
            .parse(&html, "https://www.1001tracklists.com/tracklist/3z/x.html")
            .is_none());
    }

    #[test]
    fn test_mixesdb_reads_list_under_tracklist_heading() {
        let html = Html::parse_document(
            "<body><h1 class=\"firstHeading\">2019-07-21 - Amelie Lens @ Tomorrowland</h1>\
             <div id=\"mw-content-text\"><h2><span id=\"Tracklist\">Tracklist</span></h2>\
             <ol><li>Amelie Lens - Hypnotized</li><li>[12] Farrago - Tactile</li><li>?</li></ol>\
             </div></body>",
        );
        let parsed = MixesDbScraper
            .parse(&html, "https://www.mixesdb.com/w/2019-07-21")
            .expect("tracklist");
        assert_eq!(parsed.title, "2019-07-21 - Amelie Lens @ Tomorrowland");
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].title, "Hypnotized");
    }

    #[test]
    fn test_mixesdb_without_heading_is_rejected() {
        let html = Html::parse_document("<div><ol><li>A - B track</li></ol></div>");
        assert!(MixesDbScraper
            .parse(&html, "https://www.mixesdb.com/w/x")
            .is_none());
    }

    #[test]
    fn test_discogs_reads_release_rows_and_styles() {
        let html = Html::parse_document(
            "<body><h1>Fabric 50</h1><a href=\"/artist/123-Ricardo-Villalobos\">Ricardo Villalobos</a>\
             <a href=\"/genre/electronic\">Electronic</a><a href=\"/style/minimal\">Minimal</a>\
             <table><tr class=\"tracklist_track\"><td class=\"trackTitle\">Lugom-Ix</td></tr>\
             <tr class=\"tracklist_track\"><td><span class=\"trackTitle_CTKp4\">Andruic &amp; Japan</span></td></tr>\
             </table></body>",
        );
        let parsed = DiscogsScraper
            .parse(&html, "https://www.discogs.com/release/1")
            .expect("tracklist");
        assert_eq!(parsed.artist, "Ricardo Villalobos");
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].title, "Andruic & Japan");
        assert_eq!(parsed.entries[1].artist, "Ricardo Villalobos");
        assert_eq!(parsed.genres, vec!["Electronic", "Minimal"]);
    }

    #[test]
    fn test_musicbrainz_reads_medium_table() {
        let html = Html::parse_document(
            "<body><h1><a><bdi>DJ-Kicks</bdi></a></h1>\
             <p class=\"subheader\">by <a href=\"/artist/abc\">Motor City Drum Ensemble</a></p>\
             <table class=\"medium\"><tbody>\
             <tr><td class=\"title\"><a href=\"/recording/1\"><bdi>Intro</bdi></a></td></tr>\
             <tr><td class=\"title\"><a href=\"/recording/2\"><bdi>Raw Cuts</bdi></a></td></tr>\
             </tbody></table></body>",
        );
        let parsed = MusicBrainzScraper
            .parse(&html, "https://musicbrainz.org/release/x")
            .expect("tracklist");
        assert_eq!(parsed.title, "DJ-Kicks");
        assert_eq!(parsed.artist, "Motor City Drum Ensemble");
        assert_eq!(parsed.entries.len(), 2);
    }

    #[test]
    fn test_reddit_reads_post_body_lines() {
        let html = Html::parse_document(
            "<body><h1>Tracklist for Ben UFO at Dekmantel?</h1>\
             <div class=\"md\"><p>1. Call Super - Arpo Sunder<br>2. Objekt - Theme From Q</p></div></body>",
        );
        let parsed = RedditScraper
            .parse(&html, "https://www.reddit.com/r/Techno/comments/x")
            .expect("tracklist");
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].artist, "Objekt");
    }

    #[test]
    fn test_setlistfm_builds_title_from_venue_and_date() {
        let html = Html::parse_document(
            "<body><h1><a href=\"/setlists/daft-punk.html\">Daft Punk</a></h1>\
             <a href=\"/venue/coachella.html\">Empire Polo Club</a>\
             <span class=\"dateString\">Apr 29, 2006</span>\
             <ol><li class=\"song\"><a class=\"songLabel\">Robot Rock</a></li>\
             <li class=\"song\"><a class=\"songLabel\">Around the World</a></li></ol></body>",
        );
        let parsed = SetlistFmScraper
            .parse(&html, "https://www.setlist.fm/setlist/x.html")
            .expect("tracklist");
        assert_eq!(parsed.artist, "Daft Punk");
        assert_eq!(parsed.title, "Empire Polo Club @ Apr 29, 2006");
        assert_eq!(parsed.date, "Apr 29, 2006");
        assert_eq!(parsed.entries[0].artist, "Daft Punk");
        assert_eq!(parsed.entries.len(), 2);
    }
}
