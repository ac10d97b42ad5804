//! Utility functions and helpers.

pub mod http;
pub mod retry;
pub mod url;

pub use retry::{Attempt, RetryPolicy, with_backoff};
pub use url::ArchiveLayout;
