// src/services/metadata.rs

//! Metadata sidecar resolution.
//!
//! Sidecars are only published for the canonical locale of a build.
//! Localized artifacts reuse the canonical one, so found sidecars are memoized
//! for the lifetime of the resolver. A sidecar that cannot be found resolves
//! to `None` and is looked up again next time: the artifact is not ready yet.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::models::identity::file_product;
use crate::models::{ArchiveIdentity, ArtifactKind, BuildMetadata, CrawlConfig};
use crate::services::fetcher::{ArchiveSource, Visibility};
use crate::utils::url::{ArchiveLayout, child, parent};

static REPACK_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-(eme-free|sha1)").expect("valid repack regex"));

static BUILD_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^build(\d+)/?$").expect("valid build folder regex"));

type Slot = Arc<AsyncMutex<Option<BuildMetadata>>>;

/// Finds and parses the metadata sidecar of an artifact.
pub struct MetadataResolver {
    source: Arc<dyn ArchiveSource>,
    crawl: CrawlConfig,
    layout: ArchiveLayout,
    cache: Mutex<HashMap<String, Slot>>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn ArchiveSource>, crawl: CrawlConfig, layout: ArchiveLayout) -> Self {
        Self {
            source,
            crawl,
            layout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Metadata of `identity`, or `None` if no sidecar is published yet.
    pub async fn resolve(&self, identity: &ArchiveIdentity) -> Result<Option<BuildMetadata>> {
        match identity.kind {
            ArtifactKind::Nightly => self.nightly(identity).await,
            ArtifactKind::Release => self.release(identity).await,
            ArtifactKind::Candidate { build } => self.candidate(identity, build).await,
        }
    }

    async fn nightly(&self, identity: &ArchiveIdentity) -> Result<Option<BuildMetadata>> {
        // Localized builds live in a sibling `-l10n` folder.
        let folder = identity.folder_url();
        let folder = match folder.strip_suffix("-l10n/") {
            Some(stem) => format!("{stem}/"),
            None => folder.to_string(),
        };
        let sidecar = child(
            &folder,
            &format!(
                "{}-{}.{}.{}.json",
                file_product(&identity.product),
                identity.version,
                self.crawl.canonical_locale_for(&identity.product),
                identity.platform
            ),
        );

        self.memoized(sidecar.clone(), || self.fetch_sidecar(sidecar.clone()))
            .await
    }

    async fn release(&self, identity: &ArchiveIdentity) -> Result<Option<BuildMetadata>> {
        let product = identity.product.as_str();
        let version = identity.version.as_str();
        // Repacks share the metadata of the build they were made from.
        let platform = REPACK_SUFFIX.replace_all(&identity.platform, "").into_owned();
        let key = format!("release:{product}:{version}:{platform}");

        self.memoized(key, || self.load_release(product, version, &platform))
            .await
    }

    async fn load_release(
        &self,
        product: &str,
        version: &str,
        platform: &str,
    ) -> Result<Option<BuildMetadata>> {
        let builds_url = self.layout.candidates(product, version);
        let Some(builds) = self
            .source
            .fetch_listing_optional(&builds_url, Visibility::Strict)
            .await?
        else {
            log::debug!("No candidates folder for {} {}", product, version);
            return Ok(None);
        };
        let Some((build_folder, number)) = builds
            .folder_names()
            .filter_map(|name| Some((name, build_number(name)?)))
            .max_by_key(|(_, n)| *n)
        else {
            return Ok(None);
        };

        let folder = format!(
            "{}{}/{}/{}/",
            builds_url,
            build_folder,
            platform,
            self.crawl.canonical_locale_for(product)
        );
        let Some(listing) = self
            .source
            .fetch_listing_optional(&folder, Visibility::Strict)
            .await?
        else {
            return Ok(None);
        };

        let stem = format!("{}-{}", file_product(product), version);
        let exact = format!("{stem}.json");
        let names = || listing.files.iter().map(|f| f.name.as_str());
        let name = names().find(|name| *name == exact).or_else(|| {
            names().find(|name| {
                name.starts_with(&stem)
                    && name.ends_with(".json")
                    && !name.contains("mozinfo")
                    && !name.contains("test_packages")
            })
        });
        let Some(name) = name else {
            log::warn!("Candidate folder {} has no metadata sidecar", folder);
            return Ok(None);
        };

        let metadata = self.fetch_sidecar(child(&folder, name)).await?;
        Ok(metadata.map(|m| m.with_build_number(number)))
    }

    async fn candidate(&self, identity: &ArchiveIdentity, build: u32) -> Result<Option<BuildMetadata>> {
        let product = identity.product.as_str();
        let canonical = self.crawl.canonical_locale_for(product);
        let folder = child(parent(identity.folder_url()), &format!("{canonical}/"));

        let name = if product == "fennec" {
            let filename = identity.filename();
            let ext = self.crawl.archive_extension(filename).unwrap_or_default();
            format!("{}json", &filename[..filename.len() - ext.len()])
        } else {
            format!("{}-{}.json", file_product(product), identity.base_version())
        };
        let sidecar = child(&folder, &name);

        let metadata = self
            .memoized(sidecar.clone(), || self.fetch_sidecar(sidecar.clone()))
            .await?;
        Ok(metadata.map(|m| m.with_build_number(build)))
    }

    async fn fetch_sidecar(&self, url: String) -> Result<Option<BuildMetadata>> {
        match self.source.fetch_json(&url, Visibility::Strict).await? {
            Some(value) => BuildMetadata::from_sidecar(&url, &value).map(Some),
            None => {
                log::debug!("Metadata sidecar {} not published yet", url);
                Ok(None)
            }
        }
    }

    /// Run `load` until it finds metadata for `key`. Only found metadata is
    /// kept; concurrent lookups of one key wait for each other.
    async fn memoized<F, Fut>(&self, key: String, load: F) -> Result<Option<BuildMetadata>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<BuildMetadata>>>,
    {
        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(key).or_default())
        };
        let mut cached = slot.lock().await;
        if let Some(metadata) = cached.as_ref() {
            return Ok(Some(metadata.clone()));
        }
        let metadata = load().await?;
        cached.clone_from(&metadata);
        Ok(metadata)
    }
}

fn build_number(folder: &str) -> Option<u32> {
    BUILD_NUMBER.captures(folder)?.get(1)?.as_str().parse().ok()
}
