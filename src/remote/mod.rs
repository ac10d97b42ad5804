//! Record store client abstraction.
//!
//! The publisher and the crawl markers only depend on [`RecordStore`]:
//!
//! - [`HttpRecordStore`]: Kinto-style HTTP API
//! - [`MemoryStore`]: in-process store for dry runs and tests

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::Record;

pub use http::HttpRecordStore;
pub use memory::MemoryStore;

/// Server capabilities relevant to publishing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub settings: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Largest number of operations accepted in one batch request
    #[serde(default = "default_batch_max_requests")]
    pub batch_max_requests: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            batch_max_requests: default_batch_max_requests(),
        }
    }
}

fn default_batch_max_requests() -> usize {
    25
}

/// Query over stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub product: Option<String>,
    pub channel: Option<String>,
    /// Sort field, `-` prefixed for descending
    pub sort: Option<String>,
    pub limit: Option<usize>,
    /// Only records modified after this revision
    pub since: Option<u64>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Most recently published record of a product on a channel.
    pub fn latest(product: &str, channel: &str) -> Self {
        Self::new()
            .product(product)
            .channel(channel)
            .sort("-download.date")
            .limit(1)
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.product
            .as_ref()
            .is_none_or(|p| *p == record.source.product)
            && self
                .channel
                .as_ref()
                .is_none_or(|c| record.target.channel.as_ref() == Some(c))
            && self
                .since
                .is_none_or(|since| record.last_modified.is_some_and(|lm| lm > since))
    }
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Create unless a record with this id exists
    Create(Record),
    /// Create or overwrite
    Update(Record),
}

impl BatchOperation {
    pub fn record(&self) -> &Record {
        match self {
            BatchOperation::Create(record) | BatchOperation::Update(record) => record,
        }
    }
}

/// Per-operation outcome of a batch.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub status: u16,
    pub body: Value,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The stored record, as echoed back by the store.
    pub fn stored_record(&self) -> Option<Record> {
        serde_json::from_value(self.body.get("data")?.clone()).ok()
    }
}

/// Client of the remote record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn server_info(&self) -> Result<ServerInfo>;

    /// Records matching `filter`, following pagination.
    async fn get_records(&self, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Submit operations as one request. Results are in operation order.
    ///
    /// Fails with [`AppError::StoreUnavailable`](crate::error::AppError::StoreUnavailable)
    /// when the request as a whole did not go through.
    async fn submit_batch(&self, operations: Vec<BatchOperation>) -> Result<Vec<OperationResult>>;

    /// Create the target bucket and collection if needed.
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::release_record;

    #[test]
    fn filter_matches_product_channel_and_since() {
        let mut record = release_record("55.0", "win64", "en-US");
        record.last_modified = Some(100);

        assert!(RecordFilter::latest("firefox", "release").matches(&record));
        assert!(!RecordFilter::latest("thunderbird", "release").matches(&record));
        assert!(!RecordFilter::latest("firefox", "beta").matches(&record));
        assert!(RecordFilter::new().since(99).matches(&record));
        assert!(!RecordFilter::new().since(100).matches(&record));
    }

    #[test]
    fn server_info_defaults_batch_size() {
        let info: ServerInfo = serde_json::from_str(r#"{"settings": {}}"#).unwrap();
        assert_eq!(info.settings.batch_max_requests, 25);
        let info: ServerInfo =
            serde_json::from_str(r#"{"settings": {"batch_max_requests": 50}}"#).unwrap();
        assert_eq!(info.settings.batch_max_requests, 50);
    }
}
