//! Blocking HTTP access shared by search providers, page scrapers and cover downloads.
//!
//! Every outbound request goes through one `PageFetcher` so per-host pacing,
//! timeouts and anti-bot detection live in a single place.

use std::io::Read;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::{debug, info};

use crate::config::HttpConfig;

const MAX_PAGE_BYTES: u64 = 8 * 1024 * 1024;
const MAX_IMAGE_BYTES: u64 = 16 * 1024 * 1024;
const RATE_LIMIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(4);
const BLOCK_TITLE_MARKERS: [&str; 4] = [
    "error 403",
    "just a moment",
    "attention required",
    "access denied",
];
const BLOCK_BODY_MARKERS: [&str; 3] = [
    "unusual traffic from your computer",
    "cf-browser-verification",
    "/sorry/index?continue=",
];

/// Typed failure of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeouts, transport failures and 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Anti-bot or captcha page instead of content.
    #[error("blocked by anti-bot page: {0}")]
    Blocked(String),
    #[error("HTTP {code} for {url}")]
    Status { code: u16, url: String },
    #[error("request failed: {0}")]
    Hard(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Network seam used by every component that talks to the web.
pub trait PageFetcher: Send + Sync {
    /// GETs `url` and returns the body as text.
    fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
    /// POSTs url-encoded `fields` to `url` and returns the body as text.
    fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String, FetchError>;
    /// GETs `url` and returns the raw body.
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Lowercased host of `url` without a leading `www.`.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn page_title_lowercase(body_lowercase: &str) -> Option<&str> {
    let start = body_lowercase.find("<title")?;
    let open_end = start + body_lowercase[start..].find('>')? + 1;
    let close = open_end + body_lowercase[open_end..].find("</title>")?;
    Some(body_lowercase[open_end..close].trim())
}

/// Returns the marker that identifies `body` as an anti-bot page.
pub fn detect_block_page(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    if let Some(title) = page_title_lowercase(&lowered) {
        if let Some(marker) = BLOCK_TITLE_MARKERS
            .iter()
            .find(|marker| title.contains(**marker))
            .copied()
        {
            return Some(marker);
        }
    }
    BLOCK_BODY_MARKERS
        .iter()
        .find(|marker| lowered.contains(**marker))
        .copied()
}

fn classify_ureq_failure(url: &str, error: ureq::Error) -> FetchError {
    match error {
        ureq::Error::Status(code, response) => match code {
            429 => FetchError::RateLimited(url.to_string()),
            403 => {
                let body = response.into_string().unwrap_or_default();
                let marker = detect_block_page(&body).unwrap_or("HTTP 403");
                FetchError::Blocked(format!("{url} ({marker})"))
            }
            408 | 500 | 502 | 503 | 504 => FetchError::Transient(format!("HTTP {code} for {url}")),
            _ => FetchError::Status {
                code,
                url: url.to_string(),
            },
        },
        ureq::Error::Transport(transport) => {
            FetchError::Transient(format!("{url}: {transport}"))
        }
    }
}

fn classify_io_failure(url: &str, error: std::io::Error) -> FetchError {
    let timed_out = matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || error.to_string().to_ascii_lowercase().contains("timed out");
    if timed_out {
        FetchError::Transient(format!("reading {url} timed out: {error}"))
    } else {
        FetchError::Hard(format!("reading {url} failed: {error}"))
    }
}

fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let multiplier = 1u32 << exponent;
    base_delay
        .checked_mul(multiplier)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// `ureq`-backed fetcher with per-host pacing and transient-failure retries.
pub struct UreqFetcher {
    agent: ureq::Agent,
    user_agent: String,
    host_limiter: DefaultKeyedRateLimiter<String>,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl UreqFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .timeout_write(Duration::from_secs(config.read_timeout_secs))
            .redirects(5)
            .build();
        let quota = Quota::with_period(Duration::from_millis(config.per_host_interval_ms.max(1)))
            .expect("valid limiter period")
            .allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst"));

        Self {
            agent,
            user_agent: config.user_agent.clone(),
            host_limiter: RateLimiter::keyed(quota),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    fn wait_for_host_slot(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };
        while self.host_limiter.check_key(&host).is_err() {
            std::thread::sleep(RATE_LIMIT_POLL_INTERVAL);
        }
    }

    fn execute_with_backoff<T, F>(&self, url: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        let mut attempt = 1u32;
        loop {
            self.wait_for_host_slot(url);
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.retry_attempts => {
                    let backoff = backoff_delay(self.retry_base_delay, attempt);
                    info!(
                        "Fetch[{}]: attempt {} failed ({}), retrying in {:?}",
                        url, attempt, error, backoff
                    );
                    std::thread::sleep(backoff);
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn read_text(url: &str, response: ureq::Response) -> Result<String, FetchError> {
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_PAGE_BYTES)
            .read_to_string(&mut body)
            .map_err(|error| classify_io_failure(url, error))?;
        if let Some(marker) = detect_block_page(&body) {
            return Err(FetchError::Blocked(format!("{url} ({marker})")));
        }
        Ok(body)
    }
}

impl PageFetcher for UreqFetcher {
    fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.execute_with_backoff(url, || {
            debug!("Fetch[{}]: GET", url);
            let response = self
                .agent
                .get(url)
                .set("User-Agent", &self.user_agent)
                .set("Accept", "text/html,application/xhtml+xml")
                .set("Accept-Language", "en-US,en;q=0.8")
                .call()
                .map_err(|error| classify_ureq_failure(url, error))?;
            Self::read_text(url, response)
        })
    }

    fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String, FetchError> {
        self.execute_with_backoff(url, || {
            debug!("Fetch[{}]: POST form", url);
            let response = self
                .agent
                .post(url)
                .set("User-Agent", &self.user_agent)
                .set("Accept", "text/html,application/xhtml+xml")
                .send_form(fields)
                .map_err(|error| classify_ureq_failure(url, error))?;
            Self::read_text(url, response)
        })
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.execute_with_backoff(url, || {
            debug!("Fetch[{}]: GET bytes", url);
            let response = self
                .agent
                .get(url)
                .set("User-Agent", &self.user_agent)
                .call()
                .map_err(|error| classify_ureq_failure(url, error))?;
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_IMAGE_BYTES)
                .read_to_end(&mut bytes)
                .map_err(|error| classify_io_failure(url, error))?;
            if bytes.is_empty() {
                return Err(FetchError::Hard(format!("{url}: empty response body")));
            }
            Ok(bytes)
        })
    }
}

#[cfg(test)]
pub mod test_support {
    //! In-memory fetcher for exercising network-facing components.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{FetchError, PageFetcher};

    #[derive(Default)]
    pub struct FixtureFetcher {
        pages: Mutex<HashMap<String, Result<String, FetchError>>>,
        bytes: Mutex<HashMap<String, Vec<u8>>>,
        requests: Mutex<Vec<String>>,
    }

    impl FixtureFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(self, url: &str, body: &str) -> Self {
            self.pages
                .lock()
                .expect("fixture lock")
                .insert(url.to_string(), Ok(body.to_string()));
            self
        }

        pub fn with_error(self, url: &str, error: FetchError) -> Self {
            self.pages
                .lock()
                .expect("fixture lock")
                .insert(url.to_string(), Err(error));
            self
        }

        pub fn with_bytes(self, url: &str, body: Vec<u8>) -> Self {
            self.bytes
                .lock()
                .expect("fixture lock")
                .insert(url.to_string(), body);
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("fixture lock").clone()
        }

        fn lookup(&self, key: &str) -> Result<String, FetchError> {
            self.requests
                .lock()
                .expect("fixture lock")
                .push(key.to_string());
            self.pages
                .lock()
                .expect("fixture lock")
                .get(key)
                .cloned()
                .unwrap_or_else(|| {
                    Err(FetchError::Status {
                        code: 404,
                        url: key.to_string(),
                    })
                })
        }
    }

    impl PageFetcher for FixtureFetcher {
        fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
            self.lookup(url)
        }

        /// Form posts are keyed as `url?field=value&...` in insertion order.
        fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String, FetchError> {
            let query = fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            self.lookup(&format!("{url}?{query}"))
        }

        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.requests
                .lock()
                .expect("fixture lock")
                .push(url.to_string());
            self.bytes
                .lock()
                .expect("fixture lock")
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    code: 404,
                    url: url.to_string(),
                })
        }
    }
}
