//! The published record and its builder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::identity::{ArchiveIdentity, ArtifactKind};
use crate::models::listing::FileEntry;
use crate::models::metadata::{BuildMetadata, DATETIME_FORMAT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub id: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub revision: Option<String>,
    pub tree: Option<String>,
    pub product: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub platform: String,
    pub locale: String,
    pub version: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub url: String,
    pub mimetype: Option<String>,
    pub size: u64,
    pub date: String,
}

/// A build artifact as stored in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub build: Option<BuildInfo>,
    pub source: SourceInfo,
    pub target: TargetInfo,
    pub download: DownloadInfo,
    #[serde(default)]
    pub systemaddons: Option<Value>,
    /// Store revision counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<u64>,
    /// Store schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<u64>,
}

impl Record {
    /// Combine a listing entry, its parsed identity and resolved metadata.
    ///
    /// The download size comes from the listing, where it is mandatory; an
    /// empty file has size zero and is still a valid artifact.
    pub fn build(
        entry: &FileEntry,
        identity: &ArchiveIdentity,
        metadata: Option<&BuildMetadata>,
    ) -> Result<Self> {
        if identity.product.is_empty() {
            return Err(AppError::validation(format!("{}: missing product", identity.url)));
        }
        if identity.version.is_empty() {
            return Err(AppError::validation(format!("{}: missing version", identity.url)));
        }
        if identity.url.is_empty() {
            return Err(AppError::validation("missing download url"));
        }

        let channel = metadata
            .map(|m| m.update_channel.clone())
            .or_else(|| identity.channel.clone());
        let build = metadata.map(|m| BuildInfo {
            id: m.build_id.clone(),
            date: m.build_date.clone(),
            number: m.build_number,
        });

        let id = record_id(identity, channel.as_deref(), build.as_ref().map(|b| b.id.as_str()));

        Ok(Self {
            id,
            build,
            source: SourceInfo {
                revision: metadata.map(|m| m.source_revision.clone()),
                tree: metadata.map(|m| m.source_tree.clone()),
                product: identity.product.clone(),
            },
            target: TargetInfo {
                platform: identity.platform.clone(),
                locale: identity.locale.clone(),
                version: identity.version.clone(),
                channel,
            },
            download: DownloadInfo {
                url: identity.url.clone(),
                mimetype: mimetype(&identity.url).map(String::from),
                size: entry.size,
                date: entry.last_modified.format(DATETIME_FORMAT).to_string(),
            },
            systemaddons: None,
            last_modified: None,
            schema: None,
        })
    }

    /// Field-by-field equality ignoring store bookkeeping (`last_modified`, `schema`).
    pub fn content_eq(&self, other: &Record) -> bool {
        self.id == other.id
            && self.build == other.build
            && self.source == other.source
            && self.target == other.target
            && self.download == other.download
            && self.systemaddons == other.systemaddons
    }
}

/// Deterministic record id.
///
/// Nightlies are keyed by channel and build id, everything else by
/// product, version, platform, locale and (when known) build id.
pub fn record_id(identity: &ArchiveIdentity, channel: Option<&str>, build_id: Option<&str>) -> String {
    let mut parts: Vec<&str> = vec![identity.product.as_str()];
    match identity.kind {
        ArtifactKind::Nightly => {
            parts.push(channel.unwrap_or("nightly"));
            parts.push(&identity.version);
            parts.extend(build_id);
        }
        ArtifactKind::Release | ArtifactKind::Candidate { .. } => {
            parts.push(&identity.version);
        }
    }
    parts.push(&identity.platform);
    parts.push(&identity.locale);
    if !matches!(identity.kind, ArtifactKind::Nightly) {
        parts.extend(build_id);
    }
    parts
        .into_iter()
        .map(sanitize_id_part)
        .collect::<Vec<_>>()
        .join("_")
}

fn sanitize_id_part(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// MIME type of an artifact, from its extension.
pub fn mimetype(url: &str) -> Option<&'static str> {
    const TYPES: [(&str, &str); 8] = [
        (".tar.bz2", "application/x-bzip2"),
        (".tar.gz", "application/gzip"),
        (".tar.xz", "application/x-xz"),
        (".zip", "application/zip"),
        (".dmg", "application/x-apple-diskimage"),
        (".apk", "application/vnd.android.package-archive"),
        (".exe", "application/x-msdownload"),
        (".msi", "application/x-msi"),
    ];
    let lower = url.to_lowercase();
    TYPES
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, mime)| *mime)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::config::CrawlConfig;

    fn entry(size: u64) -> FileEntry {
        FileEntry {
            name: "x".to_string(),
            size,
            last_modified: Utc.with_ymd_and_hms(2017, 8, 2, 15, 0, 5).unwrap(),
        }
    }

    fn identity(url: &str) -> ArchiveIdentity {
        ArchiveIdentity::parse(url, &CrawlConfig::default()).unwrap()
    }

    fn metadata(build_id: &str, channel: &str) -> BuildMetadata {
        BuildMetadata {
            source_revision: "abc".to_string(),
            source_tree: "mozilla-release".to_string(),
            build_id: build_id.to_string(),
            build_date: "2017-08-02T11:14:00Z".to_string(),
            update_channel: channel.to_string(),
            platform: None,
            build_number: Some(3),
        }
    }

    #[test]
    fn same_identity_yields_same_id() {
        let url = "https://archive.mozilla.org/pub/firefox/releases/55.0/win64/en-US/Firefox Setup 55.0.exe";
        let a = Record::build(&entry(1), &identity(url), Some(&metadata("20170802111421", "release"))).unwrap();
        let b = Record::build(&entry(999), &identity(url), Some(&metadata("20170802111421", "release"))).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "firefox_55-0_win64_en-US_20170802111421");

        let rebuilt = Record::build(&entry(1), &identity(url), Some(&metadata("20170803000000", "release"))).unwrap();
        assert_ne!(a.id, rebuilt.id);
    }

    #[test]
    fn nightly_id_uses_channel_and_build() {
        let url = "https://archive.mozilla.org/pub/firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central-l10n/firefox-57.0a1.fr.linux-x86_64.tar.bz2";
        let record = Record::build(&entry(5), &identity(url), Some(&metadata("20170809100343", "nightly"))).unwrap();
        assert_eq!(record.id, "firefox_nightly_57-0a1_20170809100343_linux-x86_64_fr");
        assert_eq!(record.download.mimetype.as_deref(), Some("application/x-bzip2"));
        assert_eq!(record.download.date, "2017-08-02T15:00:05Z");
        assert_eq!(record.build.as_ref().unwrap().number, Some(3));
    }

    #[test]
    fn zero_size_is_a_valid_size() {
        let url = "https://archive.mozilla.org/pub/firefox/releases/55.0/win64/en-US/Firefox Setup 55.0.exe";
        let record = Record::build(&entry(0), &identity(url), None).unwrap();
        assert_eq!(record.download.size, 0);
    }

    #[test]
    fn missing_version_is_a_validation_error() {
        let url = "https://archive.mozilla.org/pub/firefox/releases/55.0/win64/en-US/Firefox Setup 55.0.exe";
        let mut identity = identity(url);
        identity.version.clear();
        assert!(matches!(
            Record::build(&entry(10), &identity, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn content_eq_ignores_bookkeeping() {
        let url = "https://archive.mozilla.org/pub/firefox/releases/55.0/mac/en-US/Firefox 55.0.dmg";
        let record = Record::build(&entry(10), &identity(url), None).unwrap();
        let mut stored = record.clone();
        stored.last_modified = Some(1502000000000);
        stored.schema = Some(1);
        assert!(record.content_eq(&stored));

        stored.download.size = 11;
        assert!(!record.content_eq(&stored));
    }

    #[test]
    fn serialized_record_omits_unset_bookkeeping() {
        let url = "https://archive.mozilla.org/pub/firefox/releases/55.0/mac/en-US/Firefox 55.0.dmg";
        let record = Record::build(&entry(10), &identity(url), None).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("last_modified").is_none());
        assert!(value["build"].is_null());
        assert!(value["systemaddons"].is_null());
        assert_eq!(value["download"]["mimetype"], "application/x-apple-diskimage");
    }
}
