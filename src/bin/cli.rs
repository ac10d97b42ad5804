//! Archive indexer CLI
//!
//! Local execution entry point. For AWS Lambda, use `archive-indexer-lambda`.

use std::path::PathBuf;
use std::sync::Arc;

use archive_indexer::{
    config::load_config,
    error::{AppError, Result},
    models::Config,
    pipeline::{self, ArtifactEvent, EventProcessor},
    remote::{HttpRecordStore, MemoryStore, RecordStore},
    services::{ArchiveSource, HttpArchiveSource},
    storage::{LocalSnapshotStore, PreviousRunSnapshot, SnapshotStore},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// Build archive indexer
#[derive(Parser, Debug)]
#[command(
    name = "archive-indexer",
    version,
    about = "Index build archive artifacts into a record store"
)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the archive and publish new records
    Crawl {
        /// Publish into an in-memory store seeded from the snapshot
        #[arg(long)]
        dry_run: bool,

        /// Crawl only these products (repeatable)
        #[arg(long = "product")]
        products: Vec<String>,

        /// Snapshot file (default: `publisher.snapshot_path`)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Publish the artifacts announced by one object notification
    Event {
        /// Object key, e.g. `pub/firefox/releases/55.0/...`
        #[arg(long)]
        key: String,

        /// Object size in bytes
        #[arg(long)]
        size: u64,

        /// Notification time (RFC 3339, default: now)
        #[arg(long)]
        time: Option<DateTime<Utc>>,
    },

    /// Validate configuration
    Validate,

    /// Show snapshot info
    Info {
        /// Snapshot file (default: `publisher.snapshot_path`)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn snapshot_store(config: &Config, path: Option<PathBuf>) -> LocalSnapshotStore {
    LocalSnapshotStore::new(path.unwrap_or_else(|| PathBuf::from(&config.publisher.snapshot_path)))
}

fn record_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    Ok(Arc::new(HttpRecordStore::new(
        &config.remote,
        &config.archive.user_agent,
    )?))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(Some(&cli.config))?;

    match cli.command {
        Command::Crawl {
            dry_run,
            products,
            snapshot,
        } => {
            if !products.is_empty() {
                config.crawl.products = products;
            }
            let source: Arc<dyn ArchiveSource> = Arc::new(HttpArchiveSource::new(&config.archive)?);
            let snapshots = snapshot_store(&config, snapshot);

            let summary = if dry_run {
                // Markers come from the snapshot; nothing leaves the process.
                let known = snapshots.load().await?;
                log::info!("Dry run over {} known records", known.len());
                let store = Arc::new(MemoryStore::new(25).with_records(known));
                pipeline::run_crawler(&config, source, store, None).await?
            } else {
                let store = record_store(&config)?;
                pipeline::run_crawler(&config, source, store, Some(&snapshots)).await?
            };

            log::info!(
                "{} records found, {} published, {} unchanged, {} awaiting metadata",
                summary.crawl.records,
                summary.publish.published,
                summary.publish.skipped,
                summary.crawl.incomplete
            );
            summary.into_result()?;
            log::info!("Crawl complete!");
        }

        Command::Event { key, size, time } => {
            let source: Arc<dyn ArchiveSource> = Arc::new(HttpArchiveSource::new(&config.archive)?);
            let processor = EventProcessor::new(&config, source, record_store(&config)?);
            let event = ArtifactEvent {
                key,
                size,
                event_time: time.unwrap_or_else(Utc::now),
            };
            let outcome = processor.process(&event).await?;
            log::info!("{}: {:?}", event.key, outcome);
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            // load_config already validated; check the snapshot is readable too.
            let snapshots = snapshot_store(&config, None);
            snapshots
                .load()
                .await
                .map_err(|e| AppError::config(format!("{}: {}", snapshots.location(), e)))?;
            log::info!("✓ Config OK ({} products)", config.crawl.products.len());
        }

        Command::Info { snapshot } => {
            let snapshots = snapshot_store(&config, snapshot);
            let snapshot = PreviousRunSnapshot::load(&snapshots).await?;
            log::info!("Snapshot: {}", snapshots.location());
            log::info!("Records: {}", snapshot.len());
            if snapshot.is_empty() {
                log::info!("No published records yet.");
            } else if let Some(revision) = snapshot.high_water() {
                log::info!("High-water mark: {}", revision);
            }
            log::info!(
                "Record store: {}/buckets/{}/collections/{}",
                config.remote.server_url.trim_end_matches('/'),
                config.remote.bucket,
                config.remote.collection
            );
        }
    }

    Ok(())
}
