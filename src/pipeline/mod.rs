//! Pipeline entry points.
//!
//! - `run_crawler`: crawl every product and publish through the queue
//! - `EventProcessor`: publish what a single storage notification announces

pub mod crawl;
pub mod event;
pub mod publisher;
pub mod queue;

pub use crawl::{RunSummary, run_crawler};
pub use event::{ArtifactEvent, EventOutcome, EventProcessor};
pub use publisher::{BatchPublisher, PublishReport};
