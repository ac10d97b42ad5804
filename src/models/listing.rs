//! Directory listing returned by the archive endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// One file of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Sub-folders and files of one archive folder, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    #[serde(rename = "prefixes", default)]
    pub subfolders: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl DirectoryListing {
    /// Interpret a fetched JSON document as a listing.
    ///
    /// Both keys must be present; anything else is a malformed response.
    pub fn from_value(url: &str, value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(AppError::fetch(url, "listing is not a JSON object"));
        };
        if !object.contains_key("prefixes") || !object.contains_key("files") {
            return Err(AppError::fetch(url, "listing lacks 'prefixes' or 'files'"));
        }
        serde_json::from_value(value).map_err(|e| AppError::fetch(url, e))
    }

    /// Sub-folder names without their trailing slash.
    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.subfolders
            .iter()
            .map(|prefix| prefix.trim_end_matches('/'))
            .filter(|name| !name.is_empty())
    }
}
