// src/services/fetcher.rs

//! Archive listing and sidecar fetcher.
//!
//! Transient failures (timeouts, connection resets, 5xx, 429) are retried
//! with exponential backoff. A 404 is either a definitive "absent" or, for
//! objects announced by a storage notification, a propagation delay that is
//! retried like any other transient failure.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{AppError, Result};
use crate::models::{ArchiveConfig, DirectoryListing};
use crate::utils::http::create_async_client;
use crate::utils::retry::{Attempt, RetryPolicy, is_retryable_error, should_retry, with_backoff};

/// How a "not found" answer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Absent means absent.
    Strict,
    /// The object was announced but may not be served yet; retry.
    TolerateNotYetVisible,
}

/// Source of archive listings and JSON documents.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch a JSON document. `Ok(None)` only in [`Visibility::Strict`] mode
    /// when the document does not exist.
    async fn fetch_json(&self, url: &str, visibility: Visibility) -> Result<Option<Value>>;

    async fn fetch_listing_optional(
        &self,
        url: &str,
        visibility: Visibility,
    ) -> Result<Option<DirectoryListing>> {
        match self.fetch_json(url, visibility).await? {
            Some(value) => DirectoryListing::from_value(url, value).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch a listing that must exist.
    async fn fetch_listing(&self, url: &str, visibility: Visibility) -> Result<DirectoryListing> {
        self.fetch_listing_optional(url, visibility)
            .await?
            .ok_or_else(|| AppError::NotFound(url.to_string()))
    }
}

/// [`ArchiveSource`] over HTTP, bounding the number of requests in flight.
pub struct HttpArchiveSource {
    client: Client,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl HttpArchiveSource {
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            policy: config.retry_policy(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    async fn attempt(&self, url: &str, visibility: Visibility) -> Attempt<Option<Value>> {
        let Ok(_permit) = self.permits.acquire().await else {
            return Attempt::Fail(AppError::fetch(url, "fetcher shut down"));
        };

        log::debug!("GET '{}'", url);
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if is_retryable_error(&e) => return Attempt::Retry(AppError::transient(url, e)),
            Err(e) => return Attempt::Fail(e.into()),
        };

        if let Some(outcome) = classify_status(url, response.status(), visibility) {
            return outcome;
        }

        // Some documents are served with a non-JSON content type; trust the body.
        match response.bytes().await {
            Ok(body) => parse_body(url, &body),
            Err(e) if is_retryable_error(&e) => Attempt::Retry(AppError::transient(url, e)),
            Err(e) => Attempt::Fail(e.into()),
        }
    }
}

/// What a response status decides on its own; `None` when the body holds
/// the answer.
fn classify_status(
    url: &str,
    status: StatusCode,
    visibility: Visibility,
) -> Option<Attempt<Option<Value>>> {
    if status == StatusCode::NOT_FOUND {
        return Some(match visibility {
            Visibility::Strict => Attempt::Done(None),
            Visibility::TolerateNotYetVisible => {
                Attempt::Retry(AppError::transient(url, "not yet visible (404)"))
            }
        });
    }
    if should_retry(status) {
        return Some(Attempt::Retry(AppError::transient(url, format!("status {status}"))));
    }
    if !status.is_success() {
        return Some(Attempt::Fail(AppError::fetch(url, format!("unexpected status {status}"))));
    }
    None
}

fn parse_body(url: &str, body: &[u8]) -> Attempt<Option<Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => Attempt::Done(Some(value)),
        Err(e) => Attempt::Fail(AppError::fetch(url, format!("body is not JSON: {e}"))),
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch_json(&self, url: &str, visibility: Visibility) -> Result<Option<Value>> {
        with_backoff(&self.policy, url, move |_| self.attempt(url, visibility)).await
    }
}
