//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

const CONFIG_DIR_NAME: &str = "djset-tagger";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Library scanning preferences.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Web search pacing and filtering.
    pub search: SearchConfig,
    #[serde(default)]
    /// Shared HTTP client behavior.
    pub http: HttpConfig,
    #[serde(default)]
    /// Candidate acceptance and batch pacing.
    pub matching: MatchingConfig,
    #[serde(default)]
    /// Tag writing preferences.
    pub tagging: TaggingConfig,
}

/// Library folders and scan filters.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Files shorter than this are skipped; 0 disables the filter.
    #[serde(default)]
    pub min_duration_minutes: u32,
    /// SQLite database location; empty selects the platform data directory.
    #[serde(default)]
    pub database_path: String,
}

/// Search engine pacing and result filtering.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_request_jitter_ms")]
    pub request_jitter_ms: u64,
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: usize,
    /// Scraped documents to collect before the query plan stops early.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_query_delay_ms")]
    pub query_delay_ms: u64,
    /// Results on these domains are dropped by the search client.
    #[serde(default = "default_disallowed_domains")]
    pub disallowed_domains: Vec<String>,
    /// Results on these domains are never scraped for tracklists.
    #[serde(default = "default_skipped_domains")]
    pub skipped_domains: Vec<String>,
}

/// Timeouts, identity and per-host pacing for outbound requests.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_per_host_interval_ms")]
    pub per_host_interval_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Match acceptance thresholds and batch pacing.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MatchingConfig {
    /// Minimum score for a result to become a candidate.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Minimum top score applied without review.
    #[serde(default = "default_auto_accept_threshold")]
    pub auto_accept_threshold: f64,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_enrich_top")]
    pub enrich_top: usize,
    #[serde(default = "default_fallback_queries")]
    pub fallback_queries: usize,
    #[serde(default = "default_direct_query_delay_ms")]
    pub direct_query_delay_ms: u64,
    #[serde(default = "default_inter_track_delay_ms")]
    pub inter_track_delay_ms: u64,
}

/// Cover art and tag writing preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TaggingConfig {
    #[serde(default = "default_true")]
    pub write_cover: bool,
    #[serde(default = "default_cover_max_edge_px")]
    pub cover_max_edge_px: u32,
    #[serde(default = "default_cover_jpeg_quality")]
    pub cover_jpeg_quality: u8,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            extensions: default_extensions(),
            min_duration_minutes: 0,
            database_path: String::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            request_jitter_ms: default_request_jitter_ms(),
            max_results_per_query: default_max_results_per_query(),
            max_documents: default_max_documents(),
            query_delay_ms: default_query_delay_ms(),
            disallowed_domains: default_disallowed_domains(),
            skipped_domains: default_skipped_domains(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            per_host_interval_ms: default_per_host_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            auto_accept_threshold: default_auto_accept_threshold(),
            max_candidates: default_max_candidates(),
            enrich_top: default_enrich_top(),
            fallback_queries: default_fallback_queries(),
            direct_query_delay_ms: default_direct_query_delay_ms(),
            inter_track_delay_ms: default_inter_track_delay_ms(),
        }
    }
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            write_cover: true,
            cover_max_edge_px: default_cover_max_edge_px(),
            cover_jpeg_quality: default_cover_jpeg_quality(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    ["mp3", "flac", "wav", "m4a", "aac", "ogg"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_request_delay_ms() -> u64 {
    1_000
}

fn default_request_jitter_ms() -> u64 {
    1_500
}

fn default_max_results_per_query() -> usize {
    5
}

fn default_max_documents() -> usize {
    5
}

fn default_query_delay_ms() -> u64 {
    2_000
}

fn default_disallowed_domains() -> Vec<String> {
    ["pinterest.com", "facebook.com", "instagram.com", "tiktok.com"]
        .iter()
        .map(|domain| domain.to_string())
        .collect()
}

fn default_skipped_domains() -> Vec<String> {
    [
        "youtube.com",
        "youtu.be",
        "spotify.com",
        "soundcloud.com",
        "apple.com",
        "amazon.com",
        "mixcloud.com",
        "beatport.com",
        "deezer.com",
        "tidal.com",
    ]
    .iter()
    .map(|domain| domain.to_string())
    .collect()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0 Safari/537.36"
        .to_string()
}

fn default_per_host_interval_ms() -> u64 {
    1_000
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_fuzzy_threshold() -> f64 {
    70.0
}

fn default_auto_accept_threshold() -> f64 {
    85.0
}

fn default_max_candidates() -> usize {
    10
}

fn default_enrich_top() -> usize {
    3
}

fn default_fallback_queries() -> usize {
    2
}

fn default_direct_query_delay_ms() -> u64 {
    1_000
}

fn default_inter_track_delay_ms() -> u64 {
    2_000
}

fn default_cover_max_edge_px() -> u32 {
    800
}

fn default_cover_jpeg_quality() -> u8 {
    90
}

/// Errors raised while loading or creating the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a config directory")]
    NoConfigDir,
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize default config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Clamps values that would stall or disable the pipeline.
pub fn sanitize_config(config: Config) -> Config {
    let fuzzy_threshold = config.matching.fuzzy_threshold.clamp(0.0, 100.0);
    let auto_accept_threshold = config
        .matching
        .auto_accept_threshold
        .clamp(fuzzy_threshold, 100.0);
    let extensions: Vec<String> = config
        .library
        .extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    Config {
        library: LibraryConfig {
            extensions: if extensions.is_empty() {
                default_extensions()
            } else {
                extensions
            },
            ..config.library
        },
        search: SearchConfig {
            max_results_per_query: config.search.max_results_per_query.clamp(1, 30),
            max_documents: config.search.max_documents.clamp(1, 20),
            ..config.search
        },
        http: HttpConfig {
            connect_timeout_secs: config.http.connect_timeout_secs.clamp(1, 60),
            read_timeout_secs: config.http.read_timeout_secs.clamp(5, 60),
            per_host_interval_ms: config.http.per_host_interval_ms.max(100),
            retry_attempts: config.http.retry_attempts.clamp(1, 5),
            ..config.http
        },
        matching: MatchingConfig {
            fuzzy_threshold,
            auto_accept_threshold,
            max_candidates: config.matching.max_candidates.clamp(1, 50),
            enrich_top: config.matching.enrich_top.min(config.matching.max_candidates),
            fallback_queries: config.matching.fallback_queries.min(3),
            ..config.matching
        },
        tagging: TaggingConfig {
            cover_max_edge_px: config.tagging.cover_max_edge_px.clamp(64, 4096),
            cover_jpeg_quality: config.tagging.cover_jpeg_quality.clamp(30, 100),
            ..config.tagging
        },
    }
}

/// Location of the config file under the platform config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Reads `config_file`, writing defaults first when it does not exist.
pub fn load_or_create_config(config_file: &Path) -> Result<Config, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: config_file.to_path_buf(),
        source,
    };

    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(config_file, toml::to_string(&Config::default())?).map_err(io_error)?;
    }

    let config_content = std::fs::read_to_string(config_file).map_err(io_error)?;
    let parsed = match toml::from_str::<Config>(&config_content) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "Config file {} is invalid, using defaults: {}",
                config_file.display(),
                error
            );
            Config::default()
        }
    };
    Ok(sanitize_config(parsed))
}
