//! HTML search-engine scraping with paced requests and provider fallback.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use scraper::{ElementRef, Html};

use crate::config::SearchConfig;
use crate::http_fetcher::{host_of, FetchError, PageFetcher};
use crate::protocol::SearchResult;
use crate::scrapers::html::{element_text, selector};

const DUCKDUCKGO_LITE_URL: &str = "https://lite.duckduckgo.com/lite/";
const GOOGLE_SEARCH_URL: &str = "https://www.google.com/search";
const MIN_RESULT_TITLE_CHARS: usize = 3;

/// One search engine reachable over plain HTML.
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError>;
}

fn query_param(url: &url::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Unwraps a DuckDuckGo `/l/?uddg=` redirect into its target.
pub fn resolve_duckduckgo_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    url::Url::parse(&absolute)
        .ok()
        .filter(|parsed| parsed.path().starts_with("/l/"))
        .and_then(|parsed| query_param(&parsed, "uddg"))
        .unwrap_or_else(|| href.to_string())
}

/// DuckDuckGo's JavaScript-free interface.
pub struct DuckDuckGoLite {
    fetcher: Arc<dyn PageFetcher>,
}

impl DuckDuckGoLite {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn parse_results(body: &str, max_results: usize) -> Vec<SearchResult> {
        let document = Html::parse_document(body);
        let mut links: Vec<ElementRef<'_>> =
            document.select(&selector("a.result-link")).collect();
        if links.is_empty() {
            links = document
                .select(&selector("td a[href^=\"http\"], td a[href^=\"/l/\"], td a[href^=\"//\"]"))
                .collect();
        }

        let mut results = Vec::new();
        for link in links.into_iter().take(max_results.saturating_mul(2)) {
            let Some(raw_href) = link.value().attr("href") else {
                continue;
            };
            let href = resolve_duckduckgo_redirect(raw_href.trim());
            if !href.starts_with("http") || href.contains("duckduckgo.com") {
                continue;
            }
            let title = element_text(link);
            if title.chars().count() < MIN_RESULT_TITLE_CHARS {
                continue;
            }
            let domain = host_of(&href).unwrap_or_default();
            results.push(SearchResult {
                url: href,
                title,
                snippet: String::new(),
                domain,
            });
            if results.len() >= max_results {
                break;
            }
        }
        results
    }
}

impl SearchProvider for DuckDuckGoLite {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        let body = self
            .fetcher
            .post_form(DUCKDUCKGO_LITE_URL, &[("q", query), ("kl", "")])?;
        Ok(Self::parse_results(&body, max_results))
    }
}

/// Google's classic HTML results page.
pub struct GoogleHtml {
    fetcher: Arc<dyn PageFetcher>,
}

impl GoogleHtml {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn search_url(query: &str, max_results: usize) -> String {
        format!(
            "{GOOGLE_SEARCH_URL}?q={}&num={max_results}",
            urlencoding::encode(query)
        )
    }

    fn unwrap_redirect(href: &str) -> String {
        if !href.starts_with("/url?") {
            return href.to_string();
        }
        url::Url::parse(&format!("https://www.google.com{href}"))
            .ok()
            .and_then(|parsed| query_param(&parsed, "q"))
            .unwrap_or_else(|| href.to_string())
    }

    pub fn parse_results(body: &str, max_results: usize) -> Vec<SearchResult> {
        let document = Html::parse_document(body);
        let mut blocks: Vec<ElementRef<'_>> = document.select(&selector("div.g")).collect();
        if blocks.is_empty() {
            blocks = document.select(&selector("div[data-hveid]")).collect();
        }

        let absolute_link = selector("a[href^=\"http\"]");
        let redirect_link = selector("a[href^=\"/url\"]");
        let heading = selector("h3");
        let snippet = selector("div[data-sncf], span.st, div.VwiC3b");

        let mut results = Vec::new();
        for block in blocks.into_iter().take(max_results) {
            let Some(link) = block
                .select(&absolute_link)
                .next()
                .or_else(|| block.select(&redirect_link).next())
            else {
                continue;
            };
            let href = Self::unwrap_redirect(link.value().attr("href").unwrap_or_default());
            if !href.starts_with("http") || href.contains("google.com") {
                continue;
            }
            let title = block
                .select(&heading)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(link));
            let snippet = block
                .select(&snippet)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let domain = host_of(&href).unwrap_or_default();
            results.push(SearchResult {
                url: href,
                title,
                snippet,
                domain,
            });
        }
        results
    }
}

impl SearchProvider for GoogleHtml {
    fn name(&self) -> &'static str {
        "google"
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        let body = self
            .fetcher
            .fetch_html(&Self::search_url(query, max_results))?;
        Ok(Self::parse_results(&body, max_results))
    }
}

/// Tries each provider in order until one returns results.
pub struct WebSearchClient {
    providers: Vec<Box<dyn SearchProvider>>,
    request_delay: Duration,
    request_jitter_ms: u64,
    disallowed_domains: Vec<String>,
}

impl WebSearchClient {
    pub fn new(providers: Vec<Box<dyn SearchProvider>>, config: &SearchConfig) -> Self {
        Self {
            providers,
            request_delay: Duration::from_millis(config.request_delay_ms),
            request_jitter_ms: config.request_jitter_ms,
            disallowed_domains: config
                .disallowed_domains
                .iter()
                .map(|domain| domain.to_ascii_lowercase())
                .collect(),
        }
    }

    /// DuckDuckGo first, Google as fallback.
    pub fn with_default_providers(fetcher: Arc<dyn PageFetcher>, config: &SearchConfig) -> Self {
        Self::new(
            vec![
                Box::new(DuckDuckGoLite::new(Arc::clone(&fetcher))),
                Box::new(GoogleHtml::new(fetcher)),
            ],
            config,
        )
    }

    fn pause_before_request(&self) {
        let jitter = if self.request_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.request_jitter_ms)
        } else {
            0
        };
        let delay = self.request_delay + Duration::from_millis(jitter);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn is_disallowed(&self, result: &SearchResult) -> bool {
        let domain = result.domain.to_ascii_lowercase();
        self.disallowed_domains
            .iter()
            .any(|blocked| domain.contains(blocked.as_str()))
    }

    /// Returns at most `max_results` hits from the first provider that has any.
    /// Errors only when every provider failed.
    pub fn try_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let mut last_error = None;
        let mut any_answered = false;
        for provider in &self.providers {
            self.pause_before_request();
            info!("Search[{}]: {}", provider.name(), query);
            match provider.search(query, max_results) {
                Ok(results) => {
                    let found = results.len();
                    let usable: Vec<SearchResult> = results
                        .into_iter()
                        .filter(|result| !self.is_disallowed(result))
                        .take(max_results)
                        .collect();
                    if !usable.is_empty() {
                        debug!(
                            "Search[{}]: {} results, {} usable",
                            provider.name(),
                            found,
                            usable.len()
                        );
                        return Ok(usable);
                    }
                    any_answered = true;
                    debug!(
                        "Search[{}]: no usable results for {} ({} disallowed)",
                        provider.name(),
                        query,
                        found
                    );
                }
                Err(error) => {
                    warn!("Search[{}]: {} failed: {}", provider.name(), query, error);
                    last_error = Some(error);
                }
            }
        }
        match last_error {
            Some(error) if !any_answered => Err(error),
            _ => Ok(Vec::new()),
        }
    }

    /// Like `try_search`, but a total failure is logged and yields no results.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        self.try_search(query, max_results).unwrap_or_else(|error| {
            warn!("Search: every provider failed for {}: {}", query, error);
            Vec::new()
        })
    }
}

#[cfg(test)]
pub mod test_support {
    //! Canned search provider for generator and orchestrator tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::SearchProvider;
    use crate::http_fetcher::{host_of, FetchError};
    use crate::protocol::SearchResult;

    #[derive(Default)]
    pub struct FakeProvider {
        results: HashMap<String, Vec<String>>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Answers `query` with results pointing at `urls`.
        pub fn with_results(mut self, query: &str, urls: &[&str]) -> Self {
            self.results.insert(
                query.to_string(),
                urls.iter().map(|url| url.to_string()).collect(),
            );
            self
        }

        pub fn queries(&self) -> Vec<String> {
            self.queries.lock().expect("provider lock").clone()
        }
    }

    impl SearchProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
            self.queries
                .lock()
                .expect("provider lock")
                .push(query.to_string());
            if self.fail {
                return Err(FetchError::Blocked("fake captcha".to_string()));
            }
            Ok(self
                .results
                .get(query)
                .map(|urls| {
                    urls.iter()
                        .take(max_results)
                        .map(|url| SearchResult {
                            url: url.clone(),
                            title: format!("Result {url}"),
                            snippet: format!("Tracklist at {url}"),
                            domain: host_of(url).unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeProvider;
    use super::{resolve_duckduckgo_redirect, DuckDuckGoLite, GoogleHtml, WebSearchClient};
    use crate::config::SearchConfig;

    fn quiet_config() -> SearchConfig {
        SearchConfig {
            request_delay_ms: 0,
            request_jitter_ms: 0,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_duckduckgo_parser_skips_internal_and_short_links() {
        let body = "<table>\
            <tr><td><a class=\"result-link\" href=\"https://www.1001tracklists.com/tracklist/a/x.html\">Carl Cox @ Space</a></td></tr>\
            <tr><td><a class=\"result-link\" href=\"https://duckduckgo.com/settings\">Settings</a></td></tr>\
            <tr><td><a class=\"result-link\" href=\"https://example.com/\">ab</a></td></tr>\
            <tr><td><a class=\"result-link\" href=\"//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.mixesdb.com%2Fw%2FSet&amp;rut=1\">MixesDB Set</a></td></tr>\
            </table>";
        let results = DuckDuckGoLite::parse_results(body, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].domain, "1001tracklists.com");
        assert_eq!(results[1].url, "https://www.mixesdb.com/w/Set");
        assert_eq!(results[1].domain, "mixesdb.com");
    }

    #[test]
    fn test_duckduckgo_parser_falls_back_to_table_links() {
        let body = "<table><tr><td><a href=\"https://www.discogs.com/release/1\">Fabric 50</a></td></tr></table>";
        let results = DuckDuckGoLite::parse_results(body, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Fabric 50");
    }

    #[test]
    fn test_resolve_duckduckgo_redirect_keeps_plain_urls() {
        assert_eq!(
            resolve_duckduckgo_redirect("https://example.com/a"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_google_parser_unwraps_redirects_and_reads_snippets() {
        let body = "<div class=\"g\"><a href=\"/url?q=https://www.mixesdb.com/w/Set&amp;sa=U\"><h3>Set page</h3></a>\
            <div class=\"VwiC3b\">Tracklist of the set</div></div>\
            <div class=\"g\"><a href=\"https://maps.google.com/x\">Maps</a></div>";
        let results = GoogleHtml::parse_results(body, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.mixesdb.com/w/Set");
        assert_eq!(results[0].title, "Set page");
        assert_eq!(results[0].snippet, "Tracklist of the set");
    }

    #[test]
    fn test_google_search_url_encodes_query() {
        assert_eq!(
            GoogleHtml::search_url("\"Carl Cox\" tracklist", 5),
            "https://www.google.com/search?q=%22Carl%20Cox%22%20tracklist&num=5"
        );
    }

    #[test]
    fn test_client_falls_back_when_primary_fails() {
        let client = WebSearchClient::new(
            vec![
                Box::new(FakeProvider::failing()),
                Box::new(
                    FakeProvider::new().with_results("q", &["https://www.mixesdb.com/w/Set"]),
                ),
            ],
            &quiet_config(),
        );
        let results = client.try_search("q", 5).expect("results");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_client_drops_disallowed_domains_and_reports_total_failure() {
        let client = WebSearchClient::new(
            vec![Box::new(FakeProvider::new().with_results(
                "q",
                &["https://www.pinterest.com/pin/1", "https://setlist.fm/x"],
            ))],
            &quiet_config(),
        );
        let results = client.try_search("q", 5).expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].domain, "setlist.fm");

        let failing = WebSearchClient::new(vec![Box::new(FakeProvider::failing())], &quiet_config());
        assert!(failing.try_search("q", 5).is_err());
    }

    #[test]
    fn test_primary_with_only_disallowed_results_falls_back() {
        let client = WebSearchClient::new(
            vec![
                Box::new(
                    FakeProvider::new().with_results("q", &["https://www.pinterest.com/pin/1"]),
                ),
                Box::new(
                    FakeProvider::new().with_results("q", &["https://www.mixesdb.com/w/Set"]),
                ),
            ],
            &quiet_config(),
        );
        let results = client.try_search("q", 5).expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].domain, "mixesdb.com");
    }

    #[test]
    fn test_search_returns_empty_list_when_every_provider_fails() {
        let failing = WebSearchClient::new(
            vec![Box::new(FakeProvider::failing()), Box::new(FakeProvider::failing())],
            &quiet_config(),
        );
        assert!(failing.search("q", 5).is_empty());

        let answering = WebSearchClient::new(
            vec![Box::new(
                FakeProvider::new().with_results("q", &["https://setlist.fm/x"]),
            )],
            &quiet_config(),
        );
        assert_eq!(answering.search("q", 5).len(), 1);
    }
}
