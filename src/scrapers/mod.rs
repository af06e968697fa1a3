//! Tracklist page parsers and host-based dispatch.
//!
//! Every parser turns a fetched page into a `TracklistDocument`. The registry
//! picks a site parser by host and falls back to the generic heuristics for
//! unknown hosts or when a site parser finds no tracks.

pub mod cover_art;
pub mod generic;
pub mod html;
pub mod sites;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use scraper::Html;

use crate::http_fetcher::{host_of, PageFetcher};
use crate::protocol::TracklistDocument;

/// Extracts a tracklist from one parsed page.
pub trait Scraper: Send + Sync {
    /// Value stored in `TracklistDocument::source`.
    fn source_name(&self) -> &'static str;
    /// Returns `None` unless at least one track row was found.
    fn parse(&self, document: &Html, url: &str) -> Option<TracklistDocument>;
}

/// Host-keyed parser table plus the generic fallback.
pub struct ScraperRegistry {
    fetcher: Arc<dyn PageFetcher>,
    scrapers: HashMap<&'static str, Box<dyn Scraper>>,
    generic: generic::GenericScraper,
}

impl ScraperRegistry {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        let mut scrapers: HashMap<&'static str, Box<dyn Scraper>> = HashMap::new();
        scrapers.insert("1001tracklists.com", Box::new(sites::TracklistsPageScraper));
        scrapers.insert("mixesdb.com", Box::new(sites::MixesDbScraper));
        scrapers.insert("discogs.com", Box::new(sites::DiscogsScraper));
        scrapers.insert("musicbrainz.org", Box::new(sites::MusicBrainzScraper));
        scrapers.insert("reddit.com", Box::new(sites::RedditScraper));
        scrapers.insert("setlist.fm", Box::new(sites::SetlistFmScraper));
        Self {
            fetcher,
            scrapers,
            generic: generic::GenericScraper,
        }
    }

    /// Parses an already fetched page body.
    pub fn parse_page(&self, url: &str, body: &str) -> Option<TracklistDocument> {
        let document = Html::parse_document(body);
        if let Some(scraper) = host_of(url).and_then(|host| self.scrapers.get(host.as_str())) {
            if let Some(parsed) = scraper.parse(&document, url) {
                return Some(parsed);
            }
            debug!(
                "Scraper[{}]: no tracks on {}, trying generic parser",
                scraper.source_name(),
                url
            );
        }
        self.generic.parse(&document, url)
    }

    /// Fetches and parses `url`. Fetch failures are logged and yield `None`.
    pub fn scrape(&self, url: &str) -> Option<TracklistDocument> {
        match self.fetcher.fetch_html(url) {
            Ok(body) => self.parse_page(url, &body),
            Err(error) => {
                warn!("Scraper: failed to fetch {}: {}", url, error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ScraperRegistry;
    use crate::http_fetcher::test_support::FixtureFetcher;
    use crate::http_fetcher::FetchError;

    const TRACKLISTS_PAGE: &str = "<h1 id=\"pageTitle\">Set</h1>\
        <div class=\"tlpItem\"><span class=\"trackValue\">Bicep - Glue</span></div>";
    const TEXT_PAGE: &str = "<body><h1>Blog Post</h1><p>1. Bicep - Glue</p></body>";

    fn registry(fetcher: FixtureFetcher) -> ScraperRegistry {
        ScraperRegistry::new(Arc::new(fetcher))
    }

    #[test]
    fn test_known_host_dispatches_to_site_parser() {
        let registry = registry(FixtureFetcher::new());
        let parsed = registry
            .parse_page(
                "https://www.1001tracklists.com/tracklist/abc/set.html",
                TRACKLISTS_PAGE,
            )
            .expect("tracklist");
        assert_eq!(parsed.source, "1001tracklists");
    }

    #[test]
    fn test_unknown_host_uses_generic_parser() {
        let registry = registry(FixtureFetcher::new());
        let parsed = registry
            .parse_page("https://blog.example.com/post", TEXT_PAGE)
            .expect("tracklist");
        assert_eq!(parsed.source, "web");
    }

    #[test]
    fn test_site_parser_miss_falls_back_to_generic() {
        let registry = registry(FixtureFetcher::new());
        let parsed = registry
            .parse_page("https://www.discogs.com/release/1", TEXT_PAGE)
            .expect("tracklist");
        assert_eq!(parsed.source, "web");
    }

    #[test]
    fn test_scrape_swallows_fetch_failures() {
        let url = "https://www.mixesdb.com/w/blocked";
        let registry = registry(
            FixtureFetcher::new().with_error(url, FetchError::Blocked("captcha".to_string())),
        );
        assert!(registry.scrape(url).is_none());
    }

    #[test]
    fn test_scrape_fetches_and_parses() {
        let url = "https://blog.example.com/post";
        let registry = registry(FixtureFetcher::new().with_page(url, TEXT_PAGE));
        let parsed = registry.scrape(url).expect("tracklist");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.source_url, url);
    }
}
