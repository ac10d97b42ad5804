// src/models/mod.rs

//! Domain models for the indexer.
//!
//! Listings and identities describe what the archive publishes; records
//! describe what the record store holds.

pub mod config;
pub mod identity;
pub mod listing;
pub mod metadata;
pub mod record;
pub mod stats;
pub mod version;

// Re-export all public types
pub use config::{ArchiveConfig, Config, CrawlConfig, PublisherConfig, RemoteConfig};
pub use identity::{ArchiveIdentity, ArtifactKind, NightlyFolder, UrlKind};
pub use listing::{DirectoryListing, FileEntry};
pub use metadata::{BuildMetadata, DATETIME_FORMAT};
pub use record::Record;
pub use stats::CrawlStats;
pub use version::ArchiveVersion;
