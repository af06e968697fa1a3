//! Search query planning and candidate document collection.
//!
//! A run issues up to five query variants in order, scrapes every new result URL
//! once, and stops as soon as enough documents with at least one track row have
//! been collected.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;

use crate::config::SearchConfig;
use crate::http_fetcher::FetchError;
use crate::protocol::{SearchResult, TracklistDocument};
use crate::scrapers::ScraperRegistry;
use crate::web_search::WebSearchClient;

const MAX_QUERIES: usize = 5;
const DISTINCTIVE_TITLE_CHARS: usize = 10;

struct QueryPatterns {
    extension: Regex,
    track_number: Regex,
    dated_parens: Regex,
    part_suffix: Regex,
}

fn query_patterns() -> &'static QueryPatterns {
    static PATTERNS: OnceLock<QueryPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| QueryPatterns {
        extension: Regex::new(r"(?i)\.(mp3|flac|wav|m4a)$").expect("valid extension pattern"),
        track_number: Regex::new(r"^\d+[-_\s]*").expect("valid track number pattern"),
        dated_parens: Regex::new(r"\s*\(\d{4}[-/]\d{2}[-/]\d{2}\)")
            .expect("valid dated parens pattern"),
        part_suffix: Regex::new(r"(?i)\s*Part\s*\d+\s*$").expect("valid part suffix pattern"),
    })
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Distinctive words of a filename: no extension, track number, dated
/// parenthetical or trailing "Part N".
pub fn filename_key_terms(filename: &str) -> String {
    let patterns = query_patterns();
    let without_extension = patterns.extension.replace(filename.trim(), "");
    let without_number = patterns.track_number.replace(&without_extension, "");
    let without_dates = patterns.dated_parens.replace_all(&without_number, "");
    let without_part = patterns.part_suffix.replace(&without_dates, "");
    collapse_whitespace(&without_part.replace('_', " ").replace(" - ", " "))
}

fn clean_query_title(title: &str) -> String {
    let patterns = query_patterns();
    let without_extension = patterns.extension.replace(title.trim(), "");
    let without_number = patterns.track_number.replace(&without_extension, "");
    collapse_whitespace(&without_number.replace('_', " ").replace('-', " - "))
}

/// Ordered, distinct query variants for one track.
pub fn build_queries(artist: &str, title: &str, filename: &str) -> Vec<String> {
    let artist = artist.trim();
    let title = title.trim();
    let key_terms = if filename.trim().is_empty() {
        String::new()
    } else {
        filename_key_terms(filename)
    };

    let mut queries: Vec<String> = Vec::new();
    if !artist.is_empty() || !title.is_empty() {
        let mut parts = Vec::new();
        if !artist.is_empty() {
            parts.push(format!("\"{artist}\""));
        }
        let subject = if title.is_empty() { filename } else { title };
        let cleaned = clean_query_title(subject);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
        parts.push("tracklist".to_string());
        queries.push(parts.join(" "));
    }
    if !key_terms.is_empty() {
        queries.push(format!("{key_terms} tracklist"));
    }
    if !artist.is_empty() {
        queries.push(format!("site:1001tracklists.com \"{artist}\""));
    }
    if !key_terms.is_empty() {
        queries.push(format!("site:mixesdb.com {key_terms}"));
    }
    if !artist.is_empty() && title.chars().count() > DISTINCTIVE_TITLE_CHARS {
        let cleaned = query_patterns().extension.replace(title, "");
        queries.push(format!("{} dj mix tracklist", cleaned.trim()));
    }

    let mut seen = HashSet::new();
    queries.retain(|query| seen.insert(query.clone()));
    queries.truncate(MAX_QUERIES);
    queries
}

/// Runs the query plan against the search client and scrapes the hits.
pub struct CandidateGenerator {
    search: WebSearchClient,
    scrapers: ScraperRegistry,
    results_per_query: usize,
    query_delay: Duration,
    skipped_domains: Vec<String>,
}

impl CandidateGenerator {
    pub fn new(search: WebSearchClient, scrapers: ScraperRegistry, config: &SearchConfig) -> Self {
        Self {
            search,
            scrapers,
            results_per_query: config.max_results_per_query.max(1),
            query_delay: Duration::from_millis(config.query_delay_ms),
            skipped_domains: config
                .skipped_domains
                .iter()
                .map(|domain| domain.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_skipped(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.skipped_domains
            .iter()
            .any(|skipped| domain.contains(skipped.as_str()))
    }

    /// Collects up to `max_results` documents with at least one track row.
    ///
    /// Scrapes unseen, allowed results until `documents` holds `max_results`.
    fn collect_documents(
        &self,
        results: Vec<SearchResult>,
        seen_urls: &mut HashSet<String>,
        documents: &mut Vec<TracklistDocument>,
        max_results: usize,
    ) {
        for result in results {
            if documents.len() >= max_results {
                break;
            }
            if !seen_urls.insert(result.url.clone()) {
                continue;
            }
            if self.is_skipped(&result.domain) {
                debug!("Candidates: skipping {}", result.url);
                continue;
            }
            info!("Candidates: scraping {}", result.url);
            let Some(mut document) = self.scrapers.scrape(&result.url) else {
                continue;
            };
            if document.entries.is_empty() {
                continue;
            }
            document.search_title = result.title;
            document.search_snippet = result.snippet;
            documents.push(document);
        }
    }

    /// Fails only when every query's search failed; an empty list means the
    /// engines answered but nothing usable was found.
    pub fn find_candidates(
        &self,
        artist: &str,
        title: &str,
        filename: &str,
        max_results: usize,
    ) -> Result<Vec<TracklistDocument>, FetchError> {
        let queries = build_queries(artist, title, filename);
        let mut documents = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut last_error = None;
        let mut any_search_succeeded = false;

        for (index, query) in queries.iter().enumerate() {
            if index > 0 && !self.query_delay.is_zero() {
                std::thread::sleep(self.query_delay);
            }
            // Once one search answered, later failures no longer decide the outcome.
            let results = if any_search_succeeded {
                self.search.search(query, self.results_per_query)
            } else {
                match self.search.try_search(query, self.results_per_query) {
                    Ok(results) => {
                        any_search_succeeded = true;
                        results
                    }
                    Err(error) => {
                        warn!("Candidates: query {:?} failed: {}", query, error);
                        last_error = Some(error);
                        continue;
                    }
                }
            };

            self.collect_documents(results, &mut seen_urls, &mut documents, max_results);
            if documents.len() >= max_results {
                break;
            }
        }

        match last_error {
            Some(error) if !any_search_succeeded => Err(error),
            _ => Ok(documents),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{build_queries, filename_key_terms, CandidateGenerator};
    use crate::config::SearchConfig;
    use crate::http_fetcher::test_support::FixtureFetcher;
    use crate::http_fetcher::PageFetcher;
    use crate::scrapers::ScraperRegistry;
    use crate::web_search::test_support::FakeProvider;
    use crate::web_search::WebSearchClient;

    const PAGE_A: &str = "https://www.1001tracklists.com/tracklist/a/carl-cox-space.html";
    const PAGE_B: &str = "https://www.mixesdb.com/w/Carl_Cox_Space";
    const VIDEO: &str = "https://www.youtube.com/watch?v=1";
    const TRACKLISTS_BODY: &str = "<h1 id=\"pageTitle\">Carl Cox @ Space Closing</h1>\
        <div class=\"tlpItem\"><span class=\"trackValue\">Joris Voorn - Incident</span></div>";
    const MIXESDB_BODY: &str = "<h1 class=\"firstHeading\">Carl Cox - Space Closing</h1>\
        <div><h2>Tracklist</h2><ol><li>Joris Voorn - Incident</li></ol></div>";
    const FIRST_QUERY: &str = "\"Carl Cox\" Space Closing tracklist";
    const SECOND_QUERY: &str = "Carl Cox Space Closing tracklist";

    fn quiet_config() -> SearchConfig {
        SearchConfig {
            request_delay_ms: 0,
            request_jitter_ms: 0,
            query_delay_ms: 0,
            ..SearchConfig::default()
        }
    }

    fn generator(provider: FakeProvider, fetcher: Arc<FixtureFetcher>) -> CandidateGenerator {
        let config = quiet_config();
        let shared: Arc<dyn PageFetcher> = fetcher;
        CandidateGenerator::new(
            WebSearchClient::new(vec![Box::new(provider)], &config),
            ScraperRegistry::new(shared),
            &config,
        )
    }

    #[test]
    fn test_filename_key_terms_strip_numbers_dates_and_parts() {
        assert_eq!(
            filename_key_terms("03_Carl Cox - Space Closing (2011-10-04) Part 2.mp3"),
            "Carl Cox Space Closing"
        );
    }

    #[test]
    fn test_build_queries_orders_variants() {
        let queries = build_queries(
            "Carl Cox",
            "Space Closing Party",
            "Carl Cox - Space Closing Party.mp3",
        );
        assert_eq!(
            queries,
            vec![
                "\"Carl Cox\" Space Closing Party tracklist",
                "Carl Cox Space Closing Party tracklist",
                "site:1001tracklists.com \"Carl Cox\"",
                "site:mixesdb.com Carl Cox Space Closing Party",
                "Space Closing Party dj mix tracklist",
            ]
        );
    }

    #[test]
    fn test_build_queries_without_artist_uses_filename_terms() {
        let queries = build_queries("", "", "Sunday_Session.flac");
        assert_eq!(
            queries,
            vec!["Sunday Session tracklist", "site:mixesdb.com Sunday Session"]
        );
        assert!(build_queries("", "", "").is_empty());
    }

    #[test]
    fn test_overlapping_queries_scrape_each_url_once() {
        let fetcher = Arc::new(
            FixtureFetcher::new()
                .with_page(PAGE_A, TRACKLISTS_BODY)
                .with_page(PAGE_B, MIXESDB_BODY),
        );
        let provider = FakeProvider::new()
            .with_results(FIRST_QUERY, &[PAGE_A, VIDEO])
            .with_results(SECOND_QUERY, &[PAGE_A, PAGE_B]);
        let generator = generator(provider, Arc::clone(&fetcher));

        let documents = generator
            .find_candidates("Carl Cox", "Space Closing", "Carl Cox - Space Closing.mp3", 5)
            .expect("candidates");

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].source_url, PAGE_A);
        assert_eq!(documents[0].search_title, format!("Result {PAGE_A}"));
        assert_eq!(documents[0].search_snippet, format!("Tracklist at {PAGE_A}"));
        assert_eq!(documents[1].source, "mixesdb");
        let requests = fetcher.requests();
        assert_eq!(requests.iter().filter(|url| url.as_str() == PAGE_A).count(), 1);
        assert!(!requests.iter().any(|url| url.as_str() == VIDEO));
    }

    #[test]
    fn test_generation_stops_once_enough_documents_are_found() {
        let fetcher = Arc::new(FixtureFetcher::new().with_page(PAGE_A, TRACKLISTS_BODY));
        let provider = FakeProvider::new().with_results(FIRST_QUERY, &[PAGE_A]);
        let generator = generator(provider, fetcher);

        let documents = generator
            .find_candidates("Carl Cox", "Space Closing", "Carl Cox - Space Closing.mp3", 1)
            .expect("candidates");
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn test_all_failed_searches_are_reported() {
        let generator = generator(FakeProvider::failing(), Arc::new(FixtureFetcher::new()));
        assert!(generator
            .find_candidates("Carl Cox", "Space Closing", "x.mp3", 5)
            .is_err());
    }

    #[test]
    fn test_pages_without_tracks_are_not_candidates() {
        let fetcher = Arc::new(FixtureFetcher::new().with_page(PAGE_B, "<p>nothing</p>"));
        let provider = FakeProvider::new().with_results(FIRST_QUERY, &[PAGE_B]);
        let generator = generator(provider, fetcher);
        let documents = generator
            .find_candidates("Carl Cox", "Space Closing", "Carl Cox - Space Closing.mp3", 5)
            .expect("candidates");
        assert!(documents.is_empty());
    }
}
