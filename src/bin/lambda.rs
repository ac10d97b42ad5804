//! AWS Lambda entry point for the archive indexer.
//!
//! Deploy with `cargo lambda build --release --features lambda`.
//!
//! ## Environment Variables
//!
//! - `CONFIG_PATH`: optional TOML configuration bundled with the function
//! - `SERVER_URL`, `BUCKET`, `COLLECTION`, `AUTH`: record store
//! - `PRODUCTS`, `MAX_CONCURRENT`, `TIMEOUT_SECONDS`, `NB_RETRY_REQUEST`: crawl
//! - `SNAPSHOT_S3_BUCKET`, `SNAPSHOT_S3_KEY`: previous-run snapshot location
//! - `RUST_LOG`: log level (e.g., `info`, `debug`)

use lambda_runtime::{Error as LambdaError, service_fn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Archive indexer Lambda starting...");
    lambda_runtime::run(service_fn(archive_indexer::lambda::handler)).await
}
