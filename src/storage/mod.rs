//! Previous-run snapshot and its persistence backends.
//!
//! The snapshot holds every record the store is known to have, keyed by id.
//! The publisher consults it read-only to skip unchanged records and to pick
//! update over create; it is replaced as a whole at the end of a run.
//!
//! - [`LocalSnapshotStore`]: JSON file on disk
//! - `S3SnapshotStore` (feature `s3`): JSON object in a bucket

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Record;
use crate::remote::{RecordFilter, RecordStore};

pub use local::LocalSnapshotStore;
#[cfg(feature = "s3")]
pub use s3::S3SnapshotStore;

/// Where the snapshot lives between runs.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persisted records, empty when nothing was saved yet.
    async fn load(&self) -> Result<Vec<Record>>;

    /// Replace the persisted records.
    async fn save(&self, records: &[Record]) -> Result<()>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Records published by earlier runs.
#[derive(Debug, Clone, Default)]
pub struct PreviousRunSnapshot {
    records: HashMap<String, Record>,
}

impl PreviousRunSnapshot {
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Read the persisted snapshot.
    pub async fn load(store: &dyn SnapshotStore) -> Result<Self> {
        let records = store.load().await?;
        log::info!("Loaded {} records from {}", records.len(), store.location());
        Ok(Self::from_records(records))
    }

    /// Pull records modified in the store since the snapshot's high-water mark.
    ///
    /// Returns how many entries were added or replaced.
    pub async fn refresh(&mut self, store: &dyn RecordStore) -> Result<usize> {
        let filter = match self.high_water() {
            Some(since) => RecordFilter::new().since(since),
            None => RecordFilter::new(),
        };
        let fetched = store.get_records(&filter).await?;
        let fetched_count = fetched.len();
        let changed = self.merge(fetched);
        log::info!(
            "Fetched {} records from {} ({} new or modified)",
            fetched_count,
            store.describe(),
            changed
        );
        Ok(changed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Whether the same record, bookkeeping fields aside, is already known.
    pub fn is_unchanged(&self, record: &Record) -> bool {
        self.records
            .get(&record.id)
            .is_some_and(|known| known.content_eq(record))
    }

    /// Highest store revision seen.
    pub fn high_water(&self) -> Option<u64> {
        self.records.values().filter_map(|r| r.last_modified).max()
    }

    /// Insert or replace records, returning how many entries changed.
    pub fn merge(&mut self, records: impl IntoIterator<Item = Record>) -> usize {
        let mut changed = 0;
        for record in records {
            if self.records.get(&record.id) != Some(&record) {
                self.records.insert(record.id.clone(), record);
                changed += 1;
            }
        }
        changed
    }

    /// All records, ordered by id.
    pub fn records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn save(&self, store: &dyn SnapshotStore) -> Result<()> {
        store.save(&self.records()).await?;
        log::info!("Saved {} records to {}", self.len(), store.location());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use crate::testing::{release_record, release_records};

    #[test]
    fn unchanged_ignores_bookkeeping_fields() {
        let mut known = release_record("55.0", "win64", "en-US");
        known.last_modified = Some(12);
        known.schema = Some(3);
        let snapshot = PreviousRunSnapshot::from_records([known]);

        let fresh = release_record("55.0", "win64", "en-US");
        assert!(snapshot.is_unchanged(&fresh));

        let mut resized = fresh.clone();
        resized.download.size += 1;
        assert!(!snapshot.is_unchanged(&resized));
        assert!(!snapshot.is_unchanged(&release_record("56.0", "win64", "en-US")));
    }

    #[test]
    fn merge_counts_only_real_changes() {
        let mut snapshot = PreviousRunSnapshot::from_records(release_records(2));
        assert_eq!(snapshot.merge(release_records(3)), 1);
        assert_eq!(snapshot.len(), 3);

        let mut touched = release_records(1).remove(0);
        touched.last_modified = Some(7);
        assert_eq!(snapshot.merge([touched]), 1);
        assert_eq!(snapshot.high_water(), Some(7));
    }

    #[tokio::test]
    async fn refresh_pulls_newer_records() {
        let store = MemoryStore::new(25).with_records(release_records(3));
        let mut snapshot = PreviousRunSnapshot::default();
        assert_eq!(snapshot.refresh(&store).await.unwrap(), 3);
        assert_eq!(snapshot.high_water(), Some(3));

        // Nothing modified since the high-water mark.
        assert_eq!(snapshot.refresh(&store).await.unwrap(), 0);
        assert_eq!(snapshot.len(), 3);
    }
}
