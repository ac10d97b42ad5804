// src/utils/url.rs

//! Archive URL layout.

use chrono::{Datelike, NaiveDate};

use crate::models::identity::product_dir;

/// Builds folder URLs of the archive tree.
///
/// # Examples
/// ```
/// use archive_indexer::utils::url::ArchiveLayout;
///
/// let layout = ArchiveLayout::new("https://archive.mozilla.org/");
/// assert_eq!(
///     layout.release_locale("fennec", "55.0", "android-api-15", "multi"),
///     "https://archive.mozilla.org/pub/mobile/releases/55.0/android-api-15/multi/"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    base: String,
}

impl ArchiveLayout {
    pub fn new(base_url: &str) -> Self {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Self { base }
    }

    /// URL of an object key such as `pub/firefox/releases/55.0/...`.
    ///
    /// Keys from storage notifications encode spaces as `+`.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}{}", self.base, key.trim_start_matches('/').replace('+', " "))
    }

    pub fn product_root(&self, product: &str) -> String {
        format!("{}pub/{}/", self.base, product_dir(product))
    }

    pub fn nightly_month(&self, product: &str, date: NaiveDate) -> String {
        format!(
            "{}nightly/{}/{:02}/",
            self.product_root(product),
            date.year(),
            date.month()
        )
    }

    pub fn releases_root(&self, product: &str) -> String {
        format!("{}releases/", self.product_root(product))
    }

    pub fn release_version(&self, product: &str, version: &str) -> String {
        format!("{}{}/", self.releases_root(product), version)
    }

    pub fn release_platform(&self, product: &str, version: &str, platform: &str) -> String {
        format!("{}{}/", self.release_version(product, version), platform)
    }

    pub fn release_locale(&self, product: &str, version: &str, platform: &str, locale: &str) -> String {
        format!("{}{}/", self.release_platform(product, version, platform), locale)
    }

    /// Folder listing the `buildN` folders of a version.
    pub fn candidates(&self, product: &str, version: &str) -> String {
        format!("{}candidates/{}-candidates/", self.product_root(product), version)
    }
}

/// Join a folder URL and a child name.
pub fn child(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

/// Parent folder of a URL, with a trailing slash.
pub fn parent(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => url,
    }
}
