//! Service layer of the indexer.
//!
//! - Listing and sidecar fetching (`ArchiveSource`, `HttpArchiveSource`)
//! - Build metadata lookup (`MetadataResolver`)
//! - Archive traversal (`ArchiveCrawler`)

pub mod crawler;
pub mod fetcher;
pub mod metadata;

pub use crawler::ArchiveCrawler;
pub use fetcher::{ArchiveSource, HttpArchiveSource, Visibility};
pub use metadata::MetadataResolver;
