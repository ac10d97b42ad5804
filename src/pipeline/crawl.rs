// src/pipeline/crawl.rs

//! Full crawl run: discover, publish, persist the snapshot.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Config, CrawlStats};
use crate::pipeline::publisher::{BatchPublisher, PublishReport};
use crate::pipeline::queue;
use crate::remote::RecordStore;
use crate::services::crawler::ArchiveCrawler;
use crate::services::fetcher::ArchiveSource;
use crate::storage::{PreviousRunSnapshot, SnapshotStore};

/// What a crawl run did.
#[derive(Debug)]
pub struct RunSummary {
    pub crawl: CrawlStats,
    pub publish: PublishReport,
    /// Records whose publication was never acknowledged
    pub unacknowledged: usize,
    /// Size of the snapshot after the run
    pub snapshot_records: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.publish.errors.is_empty()
    }

    /// Turn batch errors into a single run error.
    pub fn into_result(mut self) -> Result<Self> {
        let count = self.publish.errors.len();
        if count == 0 {
            return Ok(self);
        }
        let first = self.publish.errors.remove(0);
        if count == 1 {
            Err(first)
        } else {
            Err(AppError::crawl(
                "publish",
                format!("{count} batches failed, first: {first}"),
            ))
        }
    }
}

/// Crawl the archive and publish every new record.
///
/// With `snapshots` set, the previous-run snapshot is loaded from it,
/// refreshed from the store, and saved back when the run changed it.
pub async fn run_crawler(
    config: &Config,
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn RecordStore>,
    snapshots: Option<&dyn SnapshotStore>,
) -> Result<RunSummary> {
    let start_time = Utc::now();
    log::info!(
        "Indexing {} into {}",
        config.crawl.products.join(", "),
        store.describe()
    );

    store.ensure_collection().await?;
    let mut snapshot = match snapshots {
        Some(snapshots) => PreviousRunSnapshot::load(snapshots).await?,
        None => PreviousRunSnapshot::default(),
    };
    let mut changed = snapshot.refresh(store.as_ref()).await?;
    let info = store.server_info().await?;
    log::info!("Server accepts batches of {}", info.settings.batch_max_requests);

    let snapshot = Arc::new(snapshot);
    let (producer, consumer) = queue::channel(config.publisher.queue_capacity);
    let publisher = BatchPublisher::new(Arc::clone(&store), Arc::clone(&snapshot), &info, config);
    let handle = tokio::spawn(publisher.run(consumer));

    let crawler = ArchiveCrawler::new(config, source, Arc::clone(&store));
    let crawl = crawler.crawl_all(&producer).await;
    if let Err(e) = producer.finish().await {
        log::error!("Publisher stopped before the end of the crawl: {}", e);
    }

    let mut publish = handle
        .await
        .map_err(|e| AppError::crawl("publisher", e))??;
    let unacknowledged = producer.unfinished();
    if unacknowledged > 0 {
        log::warn!("{} records were not published", unacknowledged);
    }

    let mut snapshot = Arc::unwrap_or_clone(snapshot);
    changed += snapshot.merge(std::mem::take(&mut publish.applied_records));
    if let Some(snapshots) = snapshots {
        if changed > 0 {
            snapshot.save(snapshots).await?;
        } else {
            log::info!("Snapshot unchanged");
        }
    }

    let elapsed = Utc::now() - start_time;
    log::info!(
        "Run finished in {}s: {} records found, {} published, {} unchanged",
        elapsed.num_seconds(),
        crawl.records,
        publish.published,
        publish.skipped
    );

    Ok(RunSummary {
        crawl,
        publish,
        unacknowledged,
        snapshot_records: snapshot.len(),
    })
}
