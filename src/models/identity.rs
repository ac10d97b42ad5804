//! Artifact identity derived from an archive URL.
//!
//! The archive tree is laid out as
//!
//! ```text
//! pub/{product}/nightly/{YYYY}/{MM}/{YYYY-MM-DD-HH-MM-SS}-{tree}[-l10n]/{file}
//! pub/{product}/releases/{version}/{platform}/{locale}/{file}
//! pub/{product}/candidates/{version}-candidates/build{N}/{platform}/{locale}/{file}
//! ```
//!
//! Everything a record needs besides size, date and build metadata is
//! recovered from that path.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::config::CrawlConfig;

/// Products the archive is known to publish.
pub const KNOWN_PRODUCTS: [&str; 4] = ["firefox", "thunderbird", "fennec", "devedition"];

/// Folder under `pub/` holding a product.
pub fn product_dir(product: &str) -> &str {
    match product {
        "fennec" => "mobile",
        other => other,
    }
}

/// Product owning a folder under `pub/`.
pub fn product_from_dir(dir: &str) -> Option<&'static str> {
    let product = match dir {
        "mobile" => "fennec",
        other => other,
    };
    KNOWN_PRODUCTS.iter().copied().find(|p| *p == product)
}

/// Product name used in artifact file names.
pub fn file_product(product: &str) -> &str {
    match product {
        "devedition" => "firefox",
        other => other,
    }
}

/// Nightly tree holding a product's builds.
pub fn nightly_tree_for<'a>(product: &str, crawl: &'a CrawlConfig) -> &'a str {
    if product == "thunderbird" {
        "comm-central"
    } else {
        &crawl.nightly_tree
    }
}

static NIGHTLY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<product>[a-z]+)-(?P<version>\d+\.\d+[0-9a-z.]*?)\.(?P<locale>multi|[a-z]{2,3}(?:-[A-Za-z]+)*)\.(?P<platform>[a-z0-9_-]+?)(?P<installer>\.installer)?\.(?P<ext>[a-z0-9]+(?:\.[a-z0-9]+)?)$",
    )
    .expect("valid nightly filename regex")
});

static NIGHTLY_FOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stamp>\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})-(?P<rest>.+)$")
        .expect("valid nightly folder regex")
});

static LOCALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:multi|[a-z]{2,3}(?:-[A-Za-z]+)*)$").expect("valid locale regex")
});

static BUILD_FOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^build(\d+)$").expect("valid build folder regex"));

/// Which part of the archive an artifact was published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Nightly,
    Release,
    Candidate { build: u32 },
}

/// Structured identity of one build artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveIdentity {
    pub product: String,
    pub version: String,
    pub platform: String,
    pub locale: String,
    /// Known from the path for nightlies, otherwise filled from metadata.
    pub channel: Option<String>,
    pub kind: ArtifactKind,
    pub url: String,
}

/// A parsed nightly folder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightlyFolder<'a> {
    /// `YYYY-MM-DD-HH-MM-SS`
    pub stamp: &'a str,
    pub l10n: bool,
}

impl<'a> NightlyFolder<'a> {
    /// Parse a day folder, keeping only folders of `tree` (other trees are experimental).
    pub fn parse(name: &'a str, tree: &str) -> Option<Self> {
        let caps = NIGHTLY_FOLDER.captures(name)?;
        let stamp = caps.name("stamp")?.as_str();
        let rest = caps.name("rest")?.as_str();
        let belongs = rest == tree
            || rest
                .strip_prefix(tree)
                .is_some_and(|suffix| suffix.starts_with('-'));
        belongs.then(|| Self {
            stamp,
            l10n: rest.ends_with("-l10n"),
        })
    }
}

/// What a URL under the archive points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlKind {
    /// A build artifact worth a record
    Artifact(ArchiveIdentity),
    /// Metadata sidecar of a release candidate
    CandidateMetadata { product: String, build: u32 },
    /// Metadata sidecar of a nightly build, published next to its canonical locale
    NightlyMetadata { product: String, platform: String },
    Other,
}

impl UrlKind {
    pub fn classify(url: &str, crawl: &CrawlConfig) -> Self {
        if let Some(identity) = ArchiveIdentity::parse(url, crawl) {
            return UrlKind::Artifact(identity);
        }
        let Some(segments) = archive_segments(url) else {
            return UrlKind::Other;
        };
        let Some(product) = product_from_dir(segments[0]) else {
            return UrlKind::Other;
        };
        let Some(filename) = segments.last().filter(|f| f.ends_with(".json")) else {
            return UrlKind::Other;
        };
        let prefix = format!("{}-", file_product(product));
        if !filename.starts_with(&prefix) {
            return UrlKind::Other;
        }

        match segments.as_slice() {
            [_, "candidates", folder, build, _platform, locale, _]
                if folder.ends_with("-candidates") && *locale == crawl.canonical_locale_for(product) =>
            {
                match parse_build_folder(build) {
                    Some(build) => UrlKind::CandidateMetadata {
                        product: product.to_string(),
                        build,
                    },
                    None => UrlKind::Other,
                }
            }
            [_, "nightly", _year, _month, folder, filename] => {
                let tree = nightly_tree_for(product, crawl);
                let Some(folder) = NightlyFolder::parse(folder, tree) else {
                    return UrlKind::Other;
                };
                if folder.l10n {
                    return UrlKind::Other;
                }
                match NIGHTLY_FILE.captures(filename) {
                    Some(caps)
                        if &caps["ext"] == "json"
                            && caps.name("installer").is_none()
                            && &caps["locale"] == crawl.canonical_locale_for(product) =>
                    {
                        UrlKind::NightlyMetadata {
                            product: product.to_string(),
                            platform: caps["platform"].to_string(),
                        }
                    }
                    _ => UrlKind::Other,
                }
            }
            _ => UrlKind::Other,
        }
    }
}

impl ArchiveIdentity {
    /// Parse the identity of a build artifact, or `None` if the URL is not one.
    pub fn parse(url: &str, crawl: &CrawlConfig) -> Option<Self> {
        let segments = archive_segments(url)?;
        let product = product_from_dir(segments[0])?;
        let filename = *segments.last()?;
        if crawl.is_excluded_name(filename) || crawl.archive_extension(filename).is_none() {
            return None;
        }

        match segments.as_slice() {
            [_, "nightly", year, month, folder, _] => {
                if year.len() != 4 || month.len() != 2 {
                    return None;
                }
                NightlyFolder::parse(folder, nightly_tree_for(product, crawl))?;
                let caps = NIGHTLY_FILE.captures(filename)?;
                if &caps["product"] != file_product(product) {
                    return None;
                }
                Some(Self {
                    product: product.to_string(),
                    version: caps["version"].to_string(),
                    platform: caps["platform"].to_string(),
                    locale: caps["locale"].to_string(),
                    channel: Some("nightly".to_string()),
                    kind: ArtifactKind::Nightly,
                    url: url.to_string(),
                })
            }
            [_, "releases", version, platform, locale, _] => {
                Self::release_like(product, version, platform, locale, filename, crawl).map(
                    |(version, platform, locale)| Self {
                        product: product.to_string(),
                        version,
                        platform,
                        locale,
                        channel: None,
                        kind: ArtifactKind::Release,
                        url: url.to_string(),
                    },
                )
            }
            [_, "candidates", folder, build, platform, locale, _] => {
                let version = folder.strip_suffix("-candidates")?;
                let build = parse_build_folder(build)?;
                Self::release_like(product, version, platform, locale, filename, crawl).map(
                    |(version, platform, locale)| Self {
                        product: product.to_string(),
                        version: format!("{version}rc{build}"),
                        platform,
                        locale,
                        channel: None,
                        kind: ArtifactKind::Candidate { build },
                        url: url.to_string(),
                    },
                )
            }
            _ => None,
        }
    }

    fn release_like(
        product: &str,
        version: &str,
        platform: &str,
        locale: &str,
        filename: &str,
        crawl: &CrawlConfig,
    ) -> Option<(String, String, String)> {
        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        if crawl.excluded_platforms.iter().any(|p| p == platform)
            || crawl.excluded_locales.iter().any(|l| l == locale)
            || !LOCALE.is_match(locale)
        {
            return None;
        }
        let lower = filename.to_lowercase();
        let stem = file_product(product);
        let named_after_product = lower
            .strip_prefix(stem)
            .is_some_and(|rest| rest.starts_with('-') || rest.starts_with(' '));
        if !named_after_product {
            return None;
        }
        Some((version.to_string(), platform.to_string(), locale.to_string()))
    }

    /// Release version without a candidate build suffix.
    pub fn base_version(&self) -> &str {
        match self.kind {
            ArtifactKind::Candidate { .. } => self
                .version
                .rsplit_once("rc")
                .map_or(self.version.as_str(), |(base, _)| base),
            _ => &self.version,
        }
    }

    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or_default()
    }

    /// Folder URL the artifact sits in, with a trailing slash.
    pub fn folder_url(&self) -> &str {
        match self.url.rfind('/') {
            Some(idx) => &self.url[..=idx],
            None => &self.url,
        }
    }

    /// Key identifying the artifact regardless of packaging variant.
    pub fn dedup_key(&self) -> (String, String, String, String, ArtifactKind) {
        (
            self.product.clone(),
            self.version.clone(),
            self.platform.clone(),
            self.locale.clone(),
            self.kind,
        )
    }
}

fn parse_build_folder(name: &str) -> Option<u32> {
    BUILD_FOLDER.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Path segments after `/pub/`.
fn archive_segments(url: &str) -> Option<Vec<&str>> {
    let path = url.split_once("/pub/")?.1;
    let path = path.split(['?', '#']).next()?;
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://archive.mozilla.org/pub/";

    fn crawl() -> CrawlConfig {
        CrawlConfig::default()
    }

    fn parse(path: &str) -> Option<ArchiveIdentity> {
        ArchiveIdentity::parse(&format!("{BASE}{path}"), &crawl())
    }

    #[test]
    fn release_installer_identity() {
        let identity = parse("firefox/releases/55.0/win64/en-US/Firefox Setup 55.0.exe").unwrap();
        assert_eq!(identity.product, "firefox");
        assert_eq!(identity.version, "55.0");
        assert_eq!(identity.platform, "win64");
        assert_eq!(identity.locale, "en-US");
        assert_eq!(identity.channel, None);
        assert_eq!(identity.kind, ArtifactKind::Release);
    }

    #[test]
    fn release_archives_and_exclusions() {
        assert!(parse("firefox/releases/55.0/linux-x86_64/fr/firefox-55.0.tar.bz2").is_some());
        assert!(parse("firefox/releases/55.0/mac/en-US/Firefox 55.0.dmg").is_some());
        assert!(parse("firefox/releases/55.0/win64/en-US/Firefox Setup Stub 55.0.exe").is_none());
        assert!(parse("firefox/releases/55.0/win64/xpi/fr.xpi").is_none());
        assert!(parse("firefox/releases/55.0/source/firefox-55.0.source.tar.xz").is_none());
        assert!(parse("firefox/releases/55.0/linux-x86_64/en-US/firefox-55.0.checksums").is_none());
        assert!(parse("firefox/releases/55.0/linux-x86_64/en-US/thunderbird-55.0.tar.bz2").is_none());
    }

    #[test]
    fn fennec_and_devedition_aliases() {
        let fennec = parse("mobile/releases/55.0/android-api-15/multi/fennec-55.0.multi.android-arm.apk").unwrap();
        assert_eq!(fennec.product, "fennec");
        assert_eq!(fennec.locale, "multi");

        let devedition = parse("devedition/releases/56.0b3/linux-i686/de/firefox-56.0b3.tar.bz2").unwrap();
        assert_eq!(devedition.product, "devedition");
        assert_eq!(devedition.version, "56.0b3");
    }

    #[test]
    fn nightly_identity() {
        let identity = parse(
            "firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central/firefox-57.0a1.en-US.win64.installer.exe",
        )
        .unwrap();
        assert_eq!(identity.version, "57.0a1");
        assert_eq!(identity.locale, "en-US");
        assert_eq!(identity.platform, "win64");
        assert_eq!(identity.channel.as_deref(), Some("nightly"));
        assert_eq!(identity.kind, ArtifactKind::Nightly);

        let l10n = parse(
            "firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central-l10n/firefox-57.0a1.ja-JP-mac.mac.dmg",
        )
        .unwrap();
        assert_eq!(l10n.locale, "ja-JP-mac");
        assert_eq!(l10n.platform, "mac");
    }

    #[test]
    fn nightly_of_other_tree_is_ignored() {
        assert!(parse(
            "firefox/nightly/2017/08/2017-08-09-10-03-43-oak/firefox-57.0a1.en-US.linux-x86_64.tar.bz2"
        )
        .is_none());
        assert!(parse(
            "firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central/firefox-57.0a1.en-US.linux-x86_64.tests.tar.gz"
        )
        .is_none());
    }

    #[test]
    fn candidate_identity_carries_build_number() {
        let identity = parse(
            "firefox/candidates/55.0b12-candidates/build2/linux-x86_64/en-US/firefox-55.0b12.tar.bz2",
        )
        .unwrap();
        assert_eq!(identity.version, "55.0b12rc2");
        assert_eq!(identity.base_version(), "55.0b12");
        assert_eq!(identity.kind, ArtifactKind::Candidate { build: 2 });
    }

    #[test]
    fn classify_metadata_sidecars() {
        let rc = format!(
            "{BASE}firefox/candidates/55.0b12-candidates/build1/mac/en-US/firefox-55.0b12.json"
        );
        assert_eq!(
            UrlKind::classify(&rc, &crawl()),
            UrlKind::CandidateMetadata {
                product: "firefox".to_string(),
                build: 1
            }
        );

        let nightly = format!(
            "{BASE}firefox/nightly/2017/08/2017-08-08-11-40-32-mozilla-central/firefox-57.0a1.en-US.linux-i686.json"
        );
        assert_eq!(
            UrlKind::classify(&nightly, &crawl()),
            UrlKind::NightlyMetadata {
                product: "firefox".to_string(),
                platform: "linux-i686".to_string()
            }
        );

        let unknown = format!("{BASE}seamonkey/releases/2.0/linux/en-US/seamonkey-2.0.tar.bz2");
        assert_eq!(UrlKind::classify(&unknown, &crawl()), UrlKind::Other);
        assert_eq!(
            UrlKind::classify("https://archive.mozilla.org/favicon.ico", &crawl()),
            UrlKind::Other
        );
    }

    #[test]
    fn nightly_folder_tree_filter() {
        let folder = NightlyFolder::parse("2017-08-09-10-03-43-mozilla-central-l10n", "mozilla-central").unwrap();
        assert_eq!(folder.stamp, "2017-08-09-10-03-43");
        assert!(folder.l10n);
        assert!(NightlyFolder::parse("2017-08-09-10-03-43-mozilla-central-android-api-16", "mozilla-central").is_some());
        assert!(NightlyFolder::parse("2017-08-09-10-03-43-mozilla-centralx", "mozilla-central").is_none());
        assert!(NightlyFolder::parse("2017-08-09-10-03-43-date", "mozilla-central").is_none());
    }
}
