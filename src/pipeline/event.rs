// src/pipeline/event.rs

//! Single-object path for storage-change notifications.
//!
//! A notification names one object of the archive. Build artifacts are
//! published as soon as their metadata resolves; metadata sidecars publish
//! the artifacts they describe. Records are written with conditional creates,
//! so a redelivered notification is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, BatchRejection, OperationFailure, Rejection, Result};
use crate::models::{
    ArchiveIdentity, ArtifactKind, BuildMetadata, Config, CrawlConfig, DirectoryListing, FileEntry,
    Record, UrlKind,
};
use crate::remote::{BatchOperation, RecordStore};
use crate::services::crawler::deduplicate;
use crate::services::fetcher::{ArchiveSource, Visibility};
use crate::services::metadata::MetadataResolver;
use crate::utils::retry::{Attempt, RetryPolicy, with_backoff};
use crate::utils::url::{ArchiveLayout, child, parent};

/// One changed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEvent {
    /// Object key relative to the archive root, e.g. `pub/firefox/...`
    pub key: String,
    pub size: u64,
    pub event_time: DateTime<Utc>,
}

/// What became of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not something the index tracks
    Ignored,
    /// Metadata not published yet; the sidecar's own notification will follow
    Deferred,
    Published { created: usize, existing: usize },
}

/// Processes notifications one at a time.
pub struct EventProcessor {
    crawl: CrawlConfig,
    layout: ArchiveLayout,
    source: Arc<dyn ArchiveSource>,
    resolver: MetadataResolver,
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
}

impl EventProcessor {
    pub fn new(config: &Config, source: Arc<dyn ArchiveSource>, store: Arc<dyn RecordStore>) -> Self {
        let layout = ArchiveLayout::new(&config.archive.base_url);
        Self {
            resolver: MetadataResolver::new(Arc::clone(&source), config.crawl.clone(), layout.clone()),
            crawl: config.crawl.clone(),
            layout,
            source,
            store,
            policy: config.remote.retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn process(&self, event: &ArtifactEvent) -> Result<EventOutcome> {
        let url = self.layout.object_url(&event.key);
        log::debug!("Event for {}", url);

        let records = match UrlKind::classify(&url, &self.crawl) {
            UrlKind::Artifact(identity) => {
                if !self.is_tracked(&identity.product) {
                    return Ok(EventOutcome::Ignored);
                }
                log::info!("Processing {} archive: {}", identity.product, event.key);
                match self.artifact_record(event, &identity).await? {
                    Some(record) => vec![record],
                    None => {
                        log::info!("Metadata not available yet for {}", url);
                        return Ok(EventOutcome::Deferred);
                    }
                }
            }
            UrlKind::CandidateMetadata { product, build } if self.is_tracked(&product) => {
                log::info!("Processing {} candidate metadata: {}", product, event.key);
                self.candidate_records(&url, &product, build).await?
            }
            UrlKind::NightlyMetadata { product, platform } if self.is_tracked(&product) => {
                log::info!("Processing {} nightly metadata: {}", product, event.key);
                self.nightly_records(&url, &product, &platform).await?
            }
            _ => {
                log::info!("Ignored {}", event.key);
                return Ok(EventOutcome::Ignored);
            }
        };

        self.publish(records).await
    }

    fn is_tracked(&self, product: &str) -> bool {
        self.crawl.products.iter().any(|p| p == product)
    }

    /// The announced artifact itself, sized and dated from the notification.
    async fn artifact_record(
        &self,
        event: &ArtifactEvent,
        identity: &ArchiveIdentity,
    ) -> Result<Option<Record>> {
        let Some(metadata) = self.resolver.resolve(identity).await? else {
            return Ok(None);
        };
        let entry = FileEntry {
            name: identity.filename().to_string(),
            size: event.size,
            last_modified: event.event_time,
        };
        Record::build(&entry, identity, Some(&metadata)).map(Some)
    }

    /// A candidate sidecar covers the artifacts of every locale of its platform.
    async fn candidate_records(&self, url: &str, product: &str, build: u32) -> Result<Vec<Record>> {
        let metadata = self.fetch_sidecar(url).await?.with_build_number(build);
        let locale_folder = parent(url);

        let folders = if self.crawl.canonical_locale_for(product) == "multi" {
            vec![locale_folder.to_string()]
        } else {
            let platform_folder = parent(locale_folder);
            let listing = self
                .source
                .fetch_listing(platform_folder, Visibility::TolerateNotYetVisible)
                .await?;
            listing
                .folder_names()
                .filter(|l| !self.crawl.excluded_locales.iter().any(|x| x == l))
                .map(|locale| child(platform_folder, &format!("{locale}/")))
                .collect()
        };

        let mut records = Vec::new();
        for folder in folders {
            let listing = self
                .source
                .fetch_listing(&folder, Visibility::TolerateNotYetVisible)
                .await?;
            let artifacts = self.artifacts_in(&folder, listing, |identity| {
                matches!(identity.kind, ArtifactKind::Candidate { build: b } if b == build)
            });
            records.extend(build_all(artifacts, &metadata));
        }
        Ok(records)
    }

    /// A nightly sidecar covers the canonical artifact of its platform and
    /// the matching artifacts of the `-l10n` sibling folder.
    async fn nightly_records(&self, url: &str, product: &str, platform: &str) -> Result<Vec<Record>> {
        let metadata = self.fetch_sidecar(url).await?;
        let folder = parent(url);
        // The sidecar's packaging platform wins over the one in its name.
        let platform = metadata.platform.as_deref().unwrap_or(platform);
        let marker = format!(".{platform}.");
        let by_platform = |identity: &ArchiveIdentity| identity.filename().contains(&marker);

        let listing = self.source.fetch_listing(folder, Visibility::Strict).await?;
        let mut canonical = self.artifacts_in(folder, listing, by_platform);
        canonical.truncate(1);
        let mut records = build_all(canonical, &metadata);

        // Fennec keeps one platform per folder and does not repeat it in names.
        let platform_in_name = product != "fennec";
        let l10n_folder = format!("{}-l10n/", folder.trim_end_matches('/'));
        match self
            .source
            .fetch_listing_optional(&l10n_folder, Visibility::Strict)
            .await?
        {
            Some(listing) => {
                let localized = self.artifacts_in(&l10n_folder, listing, |identity| {
                    !platform_in_name || by_platform(identity)
                });
                records.extend(build_all(localized, &metadata));
            }
            None => log::debug!("No localized folder {} yet", l10n_folder),
        }
        Ok(records)
    }

    async fn fetch_sidecar(&self, url: &str) -> Result<BuildMetadata> {
        let value = self
            .source
            .fetch_json(url, Visibility::TolerateNotYetVisible)
            .await?
            .ok_or_else(|| AppError::NotFound(url.to_string()))?;
        BuildMetadata::from_sidecar(url, &value)
    }

    /// Artifacts of one folder listing, deduplicated, in listing order.
    fn artifacts_in(
        &self,
        folder: &str,
        listing: DirectoryListing,
        keep: impl Fn(&ArchiveIdentity) -> bool,
    ) -> Vec<(FileEntry, ArchiveIdentity)> {
        let artifacts = listing
            .files
            .into_iter()
            .filter_map(|entry| {
                let identity = ArchiveIdentity::parse(&child(folder, &entry.name), &self.crawl)?;
                keep(&identity).then_some((entry, identity))
            })
            .collect();
        deduplicate(artifacts)
    }

    /// Conditionally create `records`, counting those already present.
    async fn publish(&self, records: Vec<Record>) -> Result<EventOutcome> {
        if records.is_empty() {
            return Ok(EventOutcome::Published {
                created: 0,
                existing: 0,
            });
        }
        let batch_size = self.store.server_info().await?.settings.batch_max_requests.max(1);

        let mut created = 0;
        let mut existing = 0;
        let mut failures = Vec::new();
        let total = records.len();
        for (offset, chunk) in records.chunks(batch_size).enumerate() {
            let operations: Vec<BatchOperation> =
                chunk.iter().cloned().map(BatchOperation::Create).collect();
            let results = with_backoff(&self.policy, "event batch", |_| {
                let operations = operations.clone();
                async move {
                    match self.store.submit_batch(operations).await {
                        Ok(results) => Attempt::Done(results),
                        Err(e @ AppError::StoreUnavailable(_)) => Attempt::Retry(e),
                        Err(e) => Attempt::Fail(e),
                    }
                }
            })
            .await?;

            for (index, (record, result)) in chunk.iter().zip(results).enumerate() {
                match Rejection::from_status(result.status) {
                    _ if result.is_success() => {
                        log::info!("Created {}", record.id);
                        created += 1;
                    }
                    Rejection::Conflict => {
                        log::debug!("Already present: {}", record.id);
                        existing += 1;
                    }
                    rejection => failures.push(OperationFailure {
                        position: offset * batch_size + index + 1,
                        record_id: record.id.clone(),
                        rejection,
                        detail: result
                            .body
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    }),
                }
            }
        }

        if !failures.is_empty() {
            return Err(AppError::Batch(BatchRejection { total, failures }));
        }
        Ok(EventOutcome::Published { created, existing })
    }
}

/// Records of artifacts sharing one metadata document; invalid ones are logged and dropped.
fn build_all(artifacts: Vec<(FileEntry, ArchiveIdentity)>, metadata: &BuildMetadata) -> Vec<Record> {
    artifacts
        .iter()
        .filter_map(|(entry, identity)| {
            Record::build(entry, identity, Some(metadata))
                .inspect_err(|e| log::error!("Dropping invalid record: {}", e))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::remote::MemoryStore;
    use crate::testing::{self, BASE, MemoryArchive, sidecar};

    const DAY: &str = "pub/firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central/";
    const CANDIDATE: &str = "pub/firefox/candidates/55.0-candidates/build3/";

    fn processor(archive: &Arc<MemoryArchive>, store: &Arc<MemoryStore>) -> EventProcessor {
        let store: Arc<dyn RecordStore> = Arc::clone(store) as Arc<dyn RecordStore>;
        EventProcessor::new(&testing::config(), Arc::clone(archive) as Arc<dyn ArchiveSource>, store)
            .with_retry_policy(RetryPolicy::immediate(2))
    }

    fn event(key: &str) -> ArtifactEvent {
        ArtifactEvent {
            key: key.to_string(),
            size: 51_000_000,
            event_time: Utc.with_ymd_and_hms(2017, 8, 9, 12, 0, 0).unwrap(),
        }
    }

    fn publish_nightly(archive: &MemoryArchive, with_l10n: bool) {
        let day = format!("{BASE}{DAY}");
        archive.listing(
            &day,
            &[],
            &[
                ("firefox-57.0a1.en-US.linux-x86_64.tar.bz2", 100),
                ("firefox-57.0a1.en-US.linux-x86_64.json", 1),
                ("firefox-57.0a1.en-US.linux-i686.tar.bz2", 100),
            ],
        );
        archive.insert(
            format!("{day}firefox-57.0a1.en-US.linux-x86_64.json"),
            sidecar("20170809100343", "nightly", "linux-x86_64"),
        );
        if with_l10n {
            archive.listing(
                &format!("{BASE}pub/firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central-l10n/"),
                &[],
                &[
                    ("firefox-57.0a1.fr.linux-x86_64.tar.bz2", 100),
                    ("firefox-57.0a1.de.linux-x86_64.tar.bz2", 100),
                    ("firefox-57.0a1.de.linux-i686.tar.bz2", 100),
                ],
            );
        }
    }

    fn publish_candidate(archive: &MemoryArchive) {
        let root = format!("{BASE}{CANDIDATE}");
        archive.listing(&format!("{root}linux-x86_64/"), &["en-US", "fr", "xpi"], &[]);
        for locale in ["en-US", "fr"] {
            archive.listing(
                &format!("{root}linux-x86_64/{locale}/"),
                &[],
                &[
                    ("firefox-55.0.tar.bz2", 100),
                    ("firefox-55.0.json", 1),
                ],
            );
        }
        archive.insert(
            format!("{root}linux-x86_64/en-US/firefox-55.0.json"),
            sidecar("20170802111421", "release", "linux-x86_64"),
        );
    }

    #[tokio::test]
    async fn nightly_artifact_uses_event_size_and_time() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, false);
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{DAY}firefox-57.0a1.en-US.linux-x86_64.tar.bz2")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 1, existing: 0 });

        let records = store.records();
        assert_eq!(records[0].download.size, 51_000_000);
        assert_eq!(records[0].download.date, "2017-08-09T12:00:00Z");
    }

    #[tokio::test]
    async fn artifact_without_metadata_is_deferred() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, false);
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{DAY}firefox-57.0a1.en-US.linux-i686.tar.bz2")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Deferred);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn deferred_artifact_publishes_once_metadata_appears() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, false);
        let store = Arc::new(MemoryStore::new(25));
        let processor = processor(&archive, &store);
        let artifact = event(&format!("{DAY}firefox-57.0a1.en-US.linux-i686.tar.bz2"));

        assert_eq!(processor.process(&artifact).await.unwrap(), EventOutcome::Deferred);
        archive.insert(
            format!("{BASE}{DAY}firefox-57.0a1.en-US.linux-i686.json"),
            sidecar("20170809100343", "nightly", "linux-i686"),
        );
        let outcome = processor.process(&artifact).await.unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 1, existing: 0 });
        assert_eq!(store.records()[0].target.platform, "linux-i686");
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, false);
        let store = Arc::new(MemoryStore::new(25));
        let processor = processor(&archive, &store);
        let key = format!("{DAY}firefox-57.0a1.en-US.linux-x86_64.tar.bz2");

        processor.process(&event(&key)).await.unwrap();
        let outcome = processor.process(&event(&key)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 0, existing: 1 });
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn nightly_metadata_publishes_platform_artifacts() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, true);
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{DAY}firefox-57.0a1.en-US.linux-x86_64.json")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 3, existing: 0 });

        let mut locales: Vec<String> = store.records().into_iter().map(|r| r.target.locale).collect();
        locales.sort();
        assert_eq!(locales, vec!["de", "en-US", "fr"]);
        assert!(store.records().iter().all(|r| r.target.platform == "linux-x86_64"));
    }

    #[tokio::test]
    async fn nightly_metadata_filters_by_packaging_platform() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, true);
        let day = format!("{BASE}{DAY}");
        archive.insert(
            format!("{day}firefox-57.0a1.en-US.linux-x86_64.json"),
            sidecar("20170809100343", "nightly", "linux-i686"),
        );
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{DAY}firefox-57.0a1.en-US.linux-x86_64.json")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 2, existing: 0 });
        assert!(store.records().iter().all(|r| r.target.platform == "linux-i686"));
    }

    #[tokio::test]
    async fn nightly_metadata_without_l10n_folder() {
        let archive = Arc::new(MemoryArchive::new());
        publish_nightly(&archive, false);
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{DAY}firefox-57.0a1.en-US.linux-x86_64.json")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 1, existing: 0 });
    }

    #[tokio::test]
    async fn candidate_metadata_publishes_every_locale() {
        let archive = Arc::new(MemoryArchive::new());
        publish_candidate(&archive);
        let store = Arc::new(MemoryStore::new(25));

        let outcome = processor(&archive, &store)
            .process(&event(&format!("{CANDIDATE}linux-x86_64/en-US/firefox-55.0.json")))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Published { created: 2, existing: 0 });
        assert!(store.records().iter().all(|r| {
            r.target.version == "55.0rc3" && r.build.as_ref().unwrap().number == Some(3)
        }));
    }

    #[tokio::test]
    async fn candidate_metadata_not_yet_visible_fails_after_retries() {
        let archive = Arc::new(MemoryArchive::new());
        let store = Arc::new(MemoryStore::new(25));

        let result = processor(&archive, &store)
            .process(&event(&format!("{CANDIDATE}linux-x86_64/en-US/firefox-55.0.json")))
            .await;
        assert!(matches!(result, Err(AppError::TransientFetch { .. })));
    }

    #[tokio::test]
    async fn unrelated_keys_are_ignored() {
        let archive = Arc::new(MemoryArchive::new());
        let store = Arc::new(MemoryStore::new(25));
        let processor = processor(&archive, &store);

        for key in [
            "favicon.ico",
            "pub/firefox/nightly/2017/08/2017-08-09-10-03-43-mozilla-central/firefox-57.0a1.en-US.linux-x86_64.checksums",
            "pub/seamonkey/releases/2.49/linux-x86_64/en-US/seamonkey-2.49.tar.bz2",
        ] {
            assert_eq!(processor.process(&event(key)).await.unwrap(), EventOutcome::Ignored);
        }
        assert!(archive.requests().is_empty());
    }
}
