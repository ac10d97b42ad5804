// src/services/crawler.rs

//! Archive crawl orchestrator.
//!
//! Walks every configured product from its high-water mark:
//!
//! - nightlies: `nightly/{YYYY}/{MM}/` of the crawl date, day folders newer
//!   than the latest published nightly, then their files
//! - releases: version folders newer than the latest published version of the
//!   marker channel, then platform, locale and files
//!
//! Every directory level fans out concurrently and joins before returning.
//! A failing sub-tree is logged and counted, its siblings carry on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::join_all;

use crate::error::Result;
use crate::models::identity::nightly_tree_for;
use crate::models::{
    ArchiveIdentity, ArchiveVersion, Config, CrawlConfig, CrawlStats, DATETIME_FORMAT, FileEntry,
    NightlyFolder, Record,
};
use crate::pipeline::queue::QueueProducer;
use crate::remote::{RecordFilter, RecordStore};
use crate::services::fetcher::{ArchiveSource, Visibility};
use crate::services::metadata::MetadataResolver;
use crate::utils::url::{ArchiveLayout, child};

const NIGHTLY_FOLDER_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Discovers new artifacts and feeds their records to the queue.
pub struct ArchiveCrawler {
    crawl: CrawlConfig,
    layout: ArchiveLayout,
    source: Arc<dyn ArchiveSource>,
    resolver: Arc<MetadataResolver>,
    store: Arc<dyn RecordStore>,
}

impl ArchiveCrawler {
    pub fn new(config: &Config, source: Arc<dyn ArchiveSource>, store: Arc<dyn RecordStore>) -> Self {
        let layout = ArchiveLayout::new(&config.archive.base_url);
        let resolver = Arc::new(MetadataResolver::new(
            Arc::clone(&source),
            config.crawl.clone(),
            layout.clone(),
        ));
        Self {
            crawl: config.crawl.clone(),
            layout,
            source,
            resolver,
            store,
        }
    }

    /// Crawl nightlies, then releases, of every configured product.
    pub async fn crawl_all(&self, queue: &QueueProducer) -> CrawlStats {
        let mut stats = CrawlStats::default();

        let nightlies = join_all(
            self.crawl
                .products
                .iter()
                .map(|product| async move { (product, self.crawl_nightlies(product, queue).await) }),
        )
        .await;
        for (product, result) in nightlies {
            stats.absorb(result, &format!("{product} nightlies"));
        }

        let releases = join_all(
            self.crawl
                .products
                .iter()
                .map(|product| async move { (product, self.crawl_releases(product, queue).await) }),
        )
        .await;
        for (product, result) in releases {
            stats.absorb(result, &format!("{product} releases"));
        }

        log::info!(
            "Crawl done: {} records, {} awaiting metadata, {} invalid, {} failed branches",
            stats.records,
            stats.incomplete,
            stats.invalid,
            stats.branch_failures
        );
        stats
    }

    /// Folder name marker of the latest published nightly, empty if none.
    async fn nightly_marker(&self, product: &str) -> Result<String> {
        let latest = self
            .store
            .get_records(&RecordFilter::latest(product, "nightly"))
            .await?;
        let Some(record) = latest.first() else {
            return Ok(String::new());
        };
        match NaiveDateTime::parse_from_str(&record.download.date, DATETIME_FORMAT) {
            Ok(date) => Ok(date.format(NIGHTLY_FOLDER_FORMAT).to_string()),
            Err(e) => {
                log::warn!(
                    "Ignoring nightly marker of {}: bad date '{}' ({})",
                    product,
                    record.download.date,
                    e
                );
                Ok(String::new())
            }
        }
    }

    async fn crawl_nightlies(&self, product: &str, queue: &QueueProducer) -> Result<CrawlStats> {
        let marker = self.nightly_marker(product).await?;
        let month_url = self.layout.nightly_month(product, self.crawl.today());
        log::info!("Scrape {} nightlies after '{}' from {}", product, marker, month_url);

        let Some(listing) = self
            .source
            .fetch_listing_optional(&month_url, Visibility::Strict)
            .await?
        else {
            log::info!("No nightly folder {} yet", month_url);
            return Ok(CrawlStats::default());
        };

        let tree = nightly_tree_for(product, &self.crawl);
        let days: Vec<String> = listing
            .folder_names()
            .filter(|name| *name > marker.as_str())
            .filter(|name| NightlyFolder::parse(name, tree).is_some())
            .map(|name| child(&month_url, &format!("{name}/")))
            .collect();

        let results = join_all(days.iter().map(|day| self.crawl_folder(day, queue))).await;
        let mut stats = CrawlStats::default();
        for (day, result) in days.iter().zip(results) {
            stats.absorb(result, day);
        }
        Ok(stats)
    }

    /// Latest published version on the marker channel.
    async fn release_marker(&self, product: &str) -> Result<Option<ArchiveVersion>> {
        let latest = self
            .store
            .get_records(&RecordFilter::latest(product, &self.crawl.release_marker_channel))
            .await?;
        Ok(latest.first().and_then(|record| {
            record
                .target
                .version
                .parse::<ArchiveVersion>()
                .inspect_err(|e| log::warn!("Ignoring release marker of {}: {}", product, e))
                .ok()
        }))
    }

    async fn crawl_releases(&self, product: &str, queue: &QueueProducer) -> Result<CrawlStats> {
        let marker = self.release_marker(product).await?;
        match &marker {
            Some(version) => log::info!("Scrape {} from version {}", product, version),
            None => log::info!("Scrape all {} versions", product),
        }

        let root = self.layout.releases_root(product);
        let listing = self.source.fetch_listing(&root, Visibility::Strict).await?;
        let mut versions: Vec<ArchiveVersion> = listing
            .folder_names()
            .filter(|name| ArchiveVersion::is_indexable_folder(name))
            .filter_map(|name| name.parse().ok())
            .filter(|version| marker.as_ref().is_none_or(|marker| version > marker))
            .collect();
        versions.sort_by(|a, b| b.cmp(a));

        let results = join_all(
            versions
                .iter()
                .map(|version| self.crawl_version(product, version.as_str(), queue)),
        )
        .await;
        let mut stats = CrawlStats::default();
        for (version, result) in versions.iter().zip(results) {
            stats.absorb(result, &format!("{product} {version}"));
        }
        Ok(stats)
    }

    /// Crawl one release version folder.
    pub async fn crawl_version(
        &self,
        product: &str,
        version: &str,
        queue: &QueueProducer,
    ) -> Result<CrawlStats> {
        let url = self.layout.release_version(product, version);
        let listing = self.source.fetch_listing(&url, Visibility::Strict).await?;
        let platforms: Vec<&str> = listing
            .folder_names()
            .filter(|p| !self.crawl.excluded_platforms.iter().any(|x| x == p))
            .collect();

        let results = join_all(
            platforms
                .iter()
                .map(|platform| self.crawl_platform(product, version, platform, queue)),
        )
        .await;
        let mut stats = CrawlStats::default();
        for (platform, result) in platforms.iter().zip(results) {
            stats.absorb(result, &format!("{product} {version} {platform}"));
        }
        Ok(stats)
    }

    async fn crawl_platform(
        &self,
        product: &str,
        version: &str,
        platform: &str,
        queue: &QueueProducer,
    ) -> Result<CrawlStats> {
        let url = self.layout.release_platform(product, version, platform);
        let listing = self.source.fetch_listing(&url, Visibility::Strict).await?;
        let locales: Vec<String> = listing
            .folder_names()
            .filter(|l| !self.crawl.excluded_locales.iter().any(|x| x == l))
            .map(|locale| self.layout.release_locale(product, version, platform, locale))
            .collect();

        let results = join_all(locales.iter().map(|url| self.crawl_folder(url, queue))).await;
        let mut stats = CrawlStats::default();
        for (url, result) in locales.iter().zip(results) {
            stats.absorb(result, url);
        }
        Ok(stats)
    }

    /// List one leaf folder and enqueue the records of its artifacts.
    async fn crawl_folder(&self, url: &str, queue: &QueueProducer) -> Result<CrawlStats> {
        let listing = self.source.fetch_listing(url, Visibility::Strict).await?;
        let artifacts = listing
            .files
            .into_iter()
            .filter_map(|entry| {
                let identity = ArchiveIdentity::parse(&child(url, &entry.name), &self.crawl)?;
                Some((entry, identity))
            })
            .collect();

        let (records, mut stats) = assemble_records(&self.resolver, artifacts).await;
        for record in records {
            log::debug!("Found {}", record.download.url);
            queue.put(record).await?;
            stats.records += 1;
        }
        Ok(stats)
    }
}

/// Turn the artifacts of one folder into records, in listing order.
///
/// Packaging variants of one artifact are collapsed first. Artifacts whose
/// metadata is not published yet are skipped; invalid records are dropped.
pub async fn assemble_records(
    resolver: &MetadataResolver,
    artifacts: Vec<(FileEntry, ArchiveIdentity)>,
) -> (Vec<Record>, CrawlStats) {
    let artifacts = deduplicate(artifacts);
    let metadata = join_all(artifacts.iter().map(|(_, identity)| resolver.resolve(identity))).await;

    let mut stats = CrawlStats::default();
    let mut records = Vec::with_capacity(artifacts.len());
    for ((entry, identity), metadata) in artifacts.iter().zip(metadata) {
        let metadata = match metadata {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                log::info!("Metadata not available yet for {}", identity.url);
                stats.incomplete += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Could not resolve metadata for {}: {}", identity.url, e);
                stats.incomplete += 1;
                continue;
            }
        };
        match Record::build(entry, identity, Some(&metadata)) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::error!("Dropping invalid record: {}", e);
                stats.invalid += 1;
            }
        }
    }
    (records, stats)
}

/// Keep one file per identity: installers over archives, then the longest name.
pub(crate) fn deduplicate(artifacts: Vec<(FileEntry, ArchiveIdentity)>) -> Vec<(FileEntry, ArchiveIdentity)> {
    let rank = |entry: &FileEntry| {
        (
            entry.name.to_lowercase().ends_with(".exe"),
            entry.name.len(),
        )
    };

    let mut slots: HashMap<_, usize> = HashMap::new();
    let mut kept: Vec<(FileEntry, ArchiveIdentity)> = Vec::with_capacity(artifacts.len());
    for (entry, identity) in artifacts {
        match slots.get(&identity.dedup_key()) {
            Some(&idx) => {
                if rank(&entry) > rank(&kept[idx].0) {
                    kept[idx] = (entry, identity);
                }
            }
            None => {
                slots.insert(identity.dedup_key(), kept.len());
                kept.push((entry, identity));
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::{self, QueueItem};
    use crate::remote::MemoryStore;
    use crate::testing::{self, BASE, MemoryArchive, release_record, sidecar};

    fn crawler(archive: &Arc<MemoryArchive>, store: MemoryStore, products: &[&str]) -> ArchiveCrawler {
        let mut config = testing::config();
        config.crawl.products = products.iter().map(|p| p.to_string()).collect();
        ArchiveCrawler::new(&config, Arc::clone(archive) as Arc<dyn ArchiveSource>, Arc::new(store))
    }

    async fn drain(mut consumer: queue::QueueConsumer) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(QueueItem::Record(record)) = consumer.get().await {
            records.push(record);
            consumer.task_done();
        }
        records
    }

    fn publish_nightly_day(archive: &MemoryArchive, with_sidecar: bool) {
        let month = format!("{BASE}pub/firefox/nightly/2017/08/");
        archive.listing(
            &month,
            &[
                "2017-08-09-10-03-43-mozilla-central",
                "2017-08-09-10-03-43-mozilla-central-l10n",
                "2017-08-09-10-03-43-oak",
            ],
            &[],
        );
        let day = format!("{month}2017-08-09-10-03-43-mozilla-central/");
        archive.listing(
            &day,
            &[],
            &[
                ("firefox-57.0a1.en-US.linux-x86_64.tar.bz2", 100),
                ("firefox-57.0a1.en-US.linux-x86_64.json", 1),
                ("firefox-57.0a1.en-US.linux-x86_64.tests.zip", 100),
            ],
        );
        archive.listing(
            &format!("{month}2017-08-09-10-03-43-mozilla-central-l10n/"),
            &[],
            &[("firefox-57.0a1.fr.linux-x86_64.tar.bz2", 100)],
        );
        if with_sidecar {
            archive.insert(
                format!("{day}firefox-57.0a1.en-US.linux-x86_64.json"),
                sidecar("20170809100343", "nightly", "linux-x86_64"),
            );
        }
        archive.listing(&format!("{BASE}pub/firefox/releases/"), &[], &[]);
    }

    #[tokio::test]
    async fn nightly_locales_are_published_with_canonical_metadata() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly_day(&archive, true);
        let crawler = crawler(&archive, MemoryStore::new(25), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        let stats = crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();
        let records = drain(consumer).await;

        assert_eq!(stats.records, 2);
        assert_eq!(stats.branch_failures, 0);
        let mut locales: Vec<&str> = records.iter().map(|r| r.target.locale.as_str()).collect();
        locales.sort();
        assert_eq!(locales, vec!["en-US", "fr"]);
        assert!(records.iter().all(|r| r.build.as_ref().unwrap().id == "20170809100343"));
        assert!(records.iter().all(|r| r.target.channel.as_deref() == Some("nightly")));
        assert!(!archive.requests().iter().any(|u| u.contains("-oak")));
    }

    #[tokio::test]
    async fn nightly_folder_without_canonical_sidecar_yields_nothing() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly_day(&archive, false);
        let crawler = crawler(&archive, MemoryStore::new(25), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        let stats = crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();

        assert!(drain(consumer).await.is_empty());
        assert_eq!(stats.records, 0);
        assert_eq!(stats.incomplete, 2);
        assert_eq!(stats.branch_failures, 0);
    }

    #[tokio::test]
    async fn known_nightly_folders_are_skipped() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly_day(&archive, true);
        let mut latest = release_record("57.0a1", "linux-x86_64", "en-US");
        latest.target.channel = Some("nightly".to_string());
        latest.download.date = "2017-08-09T12:00:00Z".to_string();
        let crawler = crawler(&archive, MemoryStore::new(25).with_records([latest]), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();

        assert!(drain(consumer).await.is_empty());
    }

    fn publish_release(archive: &MemoryArchive, version: &str) {
        let root = format!("{BASE}pub/firefox/releases/{version}/");
        archive.listing(&root, &["win64", "source", "update"], &[]);
        archive.listing(&format!("{root}win64/"), &["en-US", "xpi"], &[]);
        archive.listing(
            &format!("{root}win64/en-US/"),
            &[],
            &[
                ("Firefox Setup {version}.zip".replace("{version}", version).as_str(), 90),
                ("Firefox Setup {version}.exe".replace("{version}", version).as_str(), 100),
                ("Firefox Setup Stub {version}.exe".replace("{version}", version).as_str(), 1),
            ],
        );
        let candidates = format!("{BASE}pub/firefox/candidates/{version}-candidates/");
        archive.listing(&candidates, &["build1", "build2"], &[]);
        let meta = format!("{candidates}build2/win64/en-US/");
        archive.listing(&meta, &[], &[(format!("firefox-{version}.json").as_str(), 1)]);
        archive.insert(format!("{meta}firefox-{version}.json"), sidecar("20170802111421", "release", "win64"));
    }

    #[tokio::test]
    async fn release_folders_collapse_installer_variants() {
        let archive = Arc::new(MemoryArchive::new());
        archive.listing(&format!("{BASE}pub/firefox/nightly/2017/08/"), &[], &[]);
        archive.listing(
            &format!("{BASE}pub/firefox/releases/"),
            &["55.0", "55.0-funnelcake99", "latest"],
            &[],
        );
        publish_release(&archive, "55.0");
        let crawler = crawler(&archive, MemoryStore::new(25), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        let stats = crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();
        let records = drain(consumer).await;

        assert_eq!(stats.branch_failures, 0);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.download.url.ends_with("Firefox Setup 55.0.exe"));
        assert_eq!(record.target.channel.as_deref(), Some("release"));
        assert_eq!(record.build.as_ref().unwrap().number, Some(2));
        assert_eq!(record.download.mimetype.as_deref(), Some("application/x-msdownload"));
    }

    #[tokio::test]
    async fn versions_not_above_the_marker_are_skipped() {
        let archive = Arc::new(MemoryArchive::new());
        archive.listing(&format!("{BASE}pub/firefox/nightly/2017/08/"), &[], &[]);
        archive.listing(&format!("{BASE}pub/firefox/releases/"), &["49.0"], &[]);
        publish_release(&archive, "49.0");
        let mut marker = release_record("50.0", "win64", "en-US");
        marker.target.channel = Some("beta".to_string());
        let crawler = crawler(&archive, MemoryStore::new(25).with_records([marker]), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        let stats = crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();

        assert!(drain(consumer).await.is_empty());
        assert_eq!(stats.records, 0);
        assert_eq!(archive.request_count(&format!("{BASE}pub/firefox/releases/49.0/")), 0);
    }

    #[tokio::test]
    async fn failing_branch_does_not_abort_siblings() {
        let archive = Arc::new(MemoryArchive::new());
        archive.listing(&format!("{BASE}pub/firefox/nightly/2017/08/"), &[], &[]);
        archive.listing(&format!("{BASE}pub/firefox/releases/"), &["55.0", "56.0"], &[]);
        publish_release(&archive, "55.0");
        archive.insert(format!("{BASE}pub/firefox/releases/56.0/"), serde_json::json!({"broken": true}));
        let crawler = crawler(&archive, MemoryStore::new(25), &["firefox"]);

        let (producer, consumer) = queue::channel(100);
        let stats = crawler.crawl_all(&producer).await;
        producer.finish().await.unwrap();

        assert_eq!(drain(consumer).await.len(), 1);
        assert_eq!(stats.branch_failures, 1);
    }
}
