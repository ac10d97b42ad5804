//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::retry::RetryPolicy;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote listing endpoint and HTTP behavior
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// What to crawl and how to filter it
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Record store connection settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Batching and deduplication settings
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.archive.user_agent.trim().is_empty() {
            return Err(AppError::validation("archive.user_agent is empty"));
        }
        if self.archive.timeout_secs == 0 {
            return Err(AppError::validation("archive.timeout_secs must be > 0"));
        }
        if self.archive.max_concurrent == 0 {
            return Err(AppError::validation("archive.max_concurrent must be > 0"));
        }
        if self.archive.retry_attempts == 0 {
            return Err(AppError::validation("archive.retry_attempts must be > 0"));
        }
        url::Url::parse(&self.archive.base_url)?;
        if !self.archive.base_url.ends_with('/') {
            return Err(AppError::validation("archive.base_url must end with '/'"));
        }
        if self.crawl.products.is_empty() {
            return Err(AppError::validation("No products defined"));
        }
        if self.crawl.file_extensions.is_empty() {
            return Err(AppError::validation("No file extensions defined"));
        }
        if self.remote.timeout_secs == 0 {
            return Err(AppError::validation("remote.timeout_secs must be > 0"));
        }
        if self.remote.retry_attempts == 0 {
            return Err(AppError::validation("remote.retry_attempts must be > 0"));
        }
        url::Url::parse(&self.remote.server_url)?;
        if let Some(auth) = &self.remote.auth {
            if !auth.contains(':') {
                return Err(AppError::validation("remote.auth must be 'user:password'"));
            }
        }
        if self.publisher.workers == 0 {
            return Err(AppError::validation("publisher.workers must be > 0"));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(AppError::validation("publisher.queue_capacity must be > 0"));
        }
        Ok(())
    }

    /// Override settings from environment variables.
    ///
    /// Used by the serverless entry point where no config file is shipped.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server) = var("SERVER_URL") {
            self.remote.server_url = server;
        }
        if let Some(bucket) = var("BUCKET") {
            self.remote.bucket = bucket;
        }
        if let Some(collection) = var("COLLECTION") {
            self.remote.collection = collection;
        }
        if let Some(auth) = var("AUTH") {
            self.remote.auth = Some(auth);
        }
        if let Some(products) = var("PRODUCTS") {
            let products: Vec<String> = products.split_whitespace().map(String::from).collect();
            if !products.is_empty() {
                self.crawl.products = products;
            }
        }
        if let Some(n) = var("MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.archive.max_concurrent = n;
        }
        if let Some(secs) = var("TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.archive.timeout_secs = secs;
        }
        if let Some(n) = var("NB_RETRY_REQUEST").and_then(|v| v.parse().ok()) {
            self.archive.retry_attempts = n;
        }
    }
}

/// Remote listing endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root of the archive, e.g. `https://archive.mozilla.org/`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum listing requests in flight
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per request before giving up
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay in milliseconds, doubled on every retry
    #[serde(default = "defaults::retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "defaults::retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

impl ArchiveConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
            retry_attempts: defaults::retry_attempts(),
            retry_base_delay_ms: defaults::retry_base_delay(),
            retry_max_delay_ms: defaults::retry_max_delay(),
        }
    }
}

/// Crawl scope and filename filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Products to crawl
    #[serde(default = "defaults::products")]
    pub products: Vec<String>,

    /// Tree whose nightly folders are indexed (others are experimental)
    #[serde(default = "defaults::nightly_tree")]
    pub nightly_tree: String,

    /// Locale whose metadata sidecar is published
    #[serde(default = "defaults::canonical_locale")]
    pub canonical_locale: String,

    /// Channel whose latest record marks the release high-water version
    #[serde(default = "defaults::release_marker_channel")]
    pub release_marker_channel: String,

    /// Platform folders that never hold builds
    #[serde(default = "defaults::excluded_platforms")]
    pub excluded_platforms: Vec<String>,

    /// Locale folders that never hold builds
    #[serde(default = "defaults::excluded_locales")]
    pub excluded_locales: Vec<String>,

    /// Filenames containing any of these are not indexed
    #[serde(default = "defaults::excluded_keywords")]
    pub excluded_keywords: Vec<String>,

    /// Archive extensions that are indexed
    #[serde(default = "defaults::file_extensions")]
    pub file_extensions: Vec<String>,

    /// Fixed crawl date; the current UTC date when unset
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

impl CrawlConfig {
    /// Date whose month folder the nightly crawl starts from.
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Locale carrying the metadata sidecar for `product`.
    pub fn canonical_locale_for(&self, product: &str) -> &str {
        if product == "fennec" {
            "multi"
        } else {
            &self.canonical_locale
        }
    }

    pub fn is_excluded_name(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.excluded_keywords
            .iter()
            .any(|keyword| lower.contains(&keyword.to_lowercase()))
    }

    /// The extension of `filename` if it is an indexed archive type.
    pub fn archive_extension<'a>(&self, filename: &'a str) -> Option<&'a str> {
        let lower = filename.to_lowercase();
        self.file_extensions
            .iter()
            .filter(|ext| lower.ends_with(&format!(".{}", ext.to_lowercase())))
            .max_by_key(|ext| ext.len())
            .map(|ext| &filename[filename.len() - ext.len()..])
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            products: defaults::products(),
            nightly_tree: defaults::nightly_tree(),
            canonical_locale: defaults::canonical_locale(),
            release_marker_channel: defaults::release_marker_channel(),
            excluded_platforms: defaults::excluded_platforms(),
            excluded_locales: defaults::excluded_locales(),
            excluded_keywords: defaults::excluded_keywords(),
            file_extensions: defaults::file_extensions(),
            today: None,
        }
    }
}

/// Record store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "defaults::server_url")]
    pub server_url: String,

    #[serde(default = "defaults::bucket")]
    pub bucket: String,

    #[serde(default = "defaults::collection")]
    pub collection: String,

    /// Basic auth credentials as `user:password`
    #[serde(default)]
    pub auth: Option<String>,

    #[serde(default = "defaults::remote_timeout")]
    pub timeout_secs: u64,

    /// Attempts per whole-batch submission
    #[serde(default = "defaults::remote_retry_attempts")]
    pub retry_attempts: u32,

    /// Create bucket and collection when missing
    #[serde(default = "defaults::initialize")]
    pub initialize: bool,
}

impl RemoteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(defaults::retry_base_delay()),
            max_delay: Duration::from_millis(defaults::retry_max_delay()),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: defaults::server_url(),
            bucket: defaults::bucket(),
            collection: defaults::collection(),
            auth: None,
            timeout_secs: defaults::remote_timeout(),
            retry_attempts: defaults::remote_retry_attempts(),
            initialize: defaults::initialize(),
        }
    }
}

/// Batch publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Concurrent batch submissions
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// How long a partial batch waits for more records
    #[serde(default = "defaults::max_wait")]
    pub max_wait_ms: u64,

    /// Records buffered between crawl and publisher
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,

    /// Skip records identical to the previous run
    #[serde(default = "defaults::skip_unchanged")]
    pub skip_unchanged: bool,

    /// Previous-run snapshot file
    #[serde(default = "defaults::snapshot_path")]
    pub snapshot_path: String,
}

impl PublisherConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            max_wait_ms: defaults::max_wait(),
            queue_capacity: defaults::queue_capacity(),
            skip_unchanged: defaults::skip_unchanged(),
            snapshot_path: defaults::snapshot_path(),
        }
    }
}

mod defaults {
    // Archive defaults
    pub fn base_url() -> String {
        "https://archive.mozilla.org/".into()
    }
    pub fn user_agent() -> String {
        "BuildHub;storage-team@mozilla.com".into()
    }
    pub fn timeout() -> u64 {
        5 * 60
    }
    pub fn max_concurrent() -> usize {
        8
    }
    pub fn retry_attempts() -> u32 {
        9
    }
    pub fn retry_base_delay() -> u64 {
        500
    }
    pub fn retry_max_delay() -> u64 {
        30_000
    }

    // Crawl defaults
    pub fn products() -> Vec<String> {
        vec![
            "firefox".into(),
            "thunderbird".into(),
            "fennec".into(),
            "devedition".into(),
        ]
    }
    pub fn nightly_tree() -> String {
        "mozilla-central".into()
    }
    pub fn canonical_locale() -> String {
        "en-US".into()
    }
    pub fn release_marker_channel() -> String {
        "beta".into()
    }
    pub fn excluded_platforms() -> Vec<String> {
        vec!["source".into(), "update".into(), "contrib".into()]
    }
    pub fn excluded_locales() -> Vec<String> {
        vec!["xpi".into()]
    }
    pub fn excluded_keywords() -> Vec<String> {
        vec![
            "tests".into(),
            "sdk".into(),
            "crashreporter".into(),
            "stub".into(),
            "funnelcake".into(),
        ]
    }
    pub fn file_extensions() -> Vec<String> {
        vec![
            "tar.bz2".into(),
            "tar.gz".into(),
            "tar.xz".into(),
            "zip".into(),
            "dmg".into(),
            "apk".into(),
            "exe".into(),
            "msi".into(),
        ]
    }

    // Remote defaults
    pub fn server_url() -> String {
        "http://localhost:8888/v1".into()
    }
    pub fn bucket() -> String {
        "build-hub".into()
    }
    pub fn collection() -> String {
        "releases".into()
    }
    pub fn remote_timeout() -> u64 {
        60
    }
    pub fn remote_retry_attempts() -> u32 {
        3
    }
    pub fn initialize() -> bool {
        true
    }

    // Publisher defaults
    pub fn workers() -> usize {
        3
    }
    pub fn max_wait() -> u64 {
        5_000
    }
    pub fn queue_capacity() -> usize {
        1_000
    }
    pub fn skip_unchanged() -> bool {
        true
    }
    pub fn snapshot_path() -> String {
        ".previous_run.json".into()
    }
}
