//! In-memory archive and record fixtures shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{ArchiveIdentity, BuildMetadata, Config, CrawlConfig, FileEntry, Record};
use crate::services::fetcher::{ArchiveSource, Visibility};
use crate::utils::url::ArchiveLayout;

pub const BASE: &str = "https://archive.test/";

pub fn layout() -> ArchiveLayout {
    ArchiveLayout::new(BASE)
}

/// Configuration pointing at [`BASE`], with a fixed crawl date.
pub fn config() -> Config {
    let mut config = Config::default();
    config.archive.base_url = BASE.to_string();
    config.crawl.today = chrono::NaiveDate::from_ymd_opt(2017, 8, 9);
    config.publisher.max_wait_ms = 50;
    config
}

/// Archive served from a map of URL to JSON document.
#[derive(Default)]
pub struct MemoryArchive {
    documents: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, value: Value) {
        self.documents.lock().unwrap().insert(url.into(), value);
    }

    /// Publish a listing with the given sub-folders and `(name, size)` files.
    pub fn listing(&self, url: &str, folders: &[&str], files: &[(&str, u64)]) {
        let prefixes: Vec<String> = folders.iter().map(|f| format!("{f}/")).collect();
        let files: Vec<Value> = files
            .iter()
            .map(|(name, size)| {
                json!({"name": name, "size": size, "last_modified": "2017-08-09T15:13:05Z"})
            })
            .collect();
        self.insert(url, json!({"prefixes": prefixes, "files": files}));
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchive {
    async fn fetch_json(&self, url: &str, visibility: Visibility) -> Result<Option<Value>> {
        self.requests.lock().unwrap().push(url.to_string());
        let document = self.documents.lock().unwrap().get(url).cloned();
        match (document, visibility) {
            (Some(value), _) => Ok(Some(value)),
            (None, Visibility::Strict) => Ok(None),
            (None, Visibility::TolerateNotYetVisible) => {
                Err(AppError::transient(url, "not yet visible (404)"))
            }
        }
    }
}

/// Metadata sidecar document.
pub fn sidecar(build_id: &str, channel: &str, platform: &str) -> Value {
    json!({
        "buildid": build_id,
        "moz_source_repo": "MOZ_SOURCE_REPO=https://hg.mozilla.org/releases/mozilla-release",
        "moz_source_stamp": "e7ba18f8e4a5",
        "moz_update_channel": channel,
        "moz_pkg_platform": platform,
    })
}

/// A complete release record for `firefox` at `version`.
pub fn release_record(version: &str, platform: &str, locale: &str) -> Record {
    let url = format!(
        "{BASE}pub/firefox/releases/{version}/{platform}/{locale}/firefox-{version}.tar.bz2"
    );
    let identity = ArchiveIdentity::parse(&url, &CrawlConfig::default()).unwrap();
    let entry = FileEntry {
        name: identity.filename().to_string(),
        size: 1024,
        last_modified: Utc.with_ymd_and_hms(2017, 8, 2, 15, 0, 5).unwrap(),
    };
    let metadata = BuildMetadata::from_sidecar(&url, &sidecar("20170802111421", "release", platform))
        .unwrap()
        .with_build_number(3);
    Record::build(&entry, &identity, Some(&metadata)).unwrap()
}

/// `n` distinct release records.
pub fn release_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| release_record(&format!("{}.0", 10 + i), "linux-x86_64", "en-US"))
        .collect()
}
