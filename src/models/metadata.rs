//! Build provenance read from metadata sidecars.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Timestamp layout used for every date in a record.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Provenance of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub source_revision: String,
    pub source_tree: String,
    pub build_id: String,
    /// Derived from the first twelve characters of the build id
    pub build_date: String,
    pub update_channel: String,
    /// Packaging platform, when the sidecar names one
    pub platform: Option<String>,
    /// Candidate build number, for release and candidate artifacts
    pub build_number: Option<u32>,
}

impl BuildMetadata {
    /// Read the fields of a sidecar document.
    pub fn from_sidecar(url: &str, value: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<String> {
            match value.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(AppError::fetch(url, format!("metadata lacks '{name}'"))),
            }
        };

        let build_id = field("buildid")?;
        let build_date = build_date(&build_id)
            .ok_or_else(|| AppError::fetch(url, format!("malformed build id '{build_id}'")))?;
        let repository = field("moz_source_repo")?;
        let repository = repository.trim_start_matches("MOZ_SOURCE_REPO=");
        let source_tree = repository
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            source_revision: field("moz_source_stamp")?,
            source_tree,
            build_id,
            build_date,
            update_channel: field("moz_update_channel")?,
            platform: field("moz_pkg_platform").ok(),
            build_number: None,
        })
    }

    pub fn with_build_number(mut self, build_number: u32) -> Self {
        self.build_number = Some(build_number);
        self
    }
}

/// `YYYYMMDDHHMM...` to a formatted timestamp.
pub fn build_date(build_id: &str) -> Option<String> {
    let compact = build_id.get(..12)?;
    NaiveDateTime::parse_from_str(compact, "%Y%m%d%H%M")
        .ok()
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_release_sidecar() {
        let value = json!({
            "buildid": "20170802111421",
            "moz_source_repo": "MOZ_SOURCE_REPO=https://hg.mozilla.org/releases/mozilla-release",
            "moz_source_stamp": "e7ba18f8e4a5b8b3bbee67d3b1dbe6e1c2a3c3c0",
            "moz_update_channel": "release",
            "moz_pkg_platform": "win64"
        });
        let metadata = BuildMetadata::from_sidecar("https://x/firefox-55.0.json", &value).unwrap();
        assert_eq!(metadata.source_tree, "mozilla-release");
        assert_eq!(metadata.build_id, "20170802111421");
        assert_eq!(metadata.build_date, "2017-08-02T11:14:00Z");
        assert_eq!(metadata.update_channel, "release");
        assert_eq!(metadata.platform.as_deref(), Some("win64"));
        assert_eq!(metadata.build_number, None);
    }

    #[test]
    fn missing_fields_are_fetch_errors() {
        let value = json!({"buildid": "20170802111421"});
        assert!(matches!(
            BuildMetadata::from_sidecar("https://x/a.json", &value),
            Err(AppError::Fetch { .. })
        ));
    }

    #[test]
    fn build_date_needs_twelve_digits() {
        assert_eq!(build_date("201708"), None);
        assert_eq!(build_date("2017131200000"), None);
        assert_eq!(build_date("201708091003").as_deref(), Some("2017-08-09T10:03:00Z"));
    }
}
