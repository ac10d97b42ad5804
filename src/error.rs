// src/error.rs

//! Unified error handling for the indexer.

use std::fmt;

use thiserror::Error;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record or input validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Retryable fetch failure that survived every attempt
    #[error("Transient fetch error for {url}: {message}")]
    TransientFetch { url: String, message: String },

    /// Malformed response or unexpected shape
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// A listing that is not published
    #[error("Not found: {0}")]
    NotFound(String),

    /// Per-operation rejections of a single batch
    #[error("{0}")]
    Batch(BatchRejection),

    /// The record store could not be reached for a whole request
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    /// The consuming side of the record queue is gone
    #[error("Record queue closed")]
    QueueClosed,

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a retry-exhausted fetch error.
    pub fn transient(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a permanent fetch error.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a store-unavailable error.
    pub fn unavailable(message: impl fmt::Display) -> Self {
        Self::StoreUnavailable(message.to_string())
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error only means "this document is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Why the store refused a single operation of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The record already exists (conditional create lost).
    Conflict,
    /// The store considers the record malformed.
    Invalid,
    /// Any other non-success status.
    Other(u16),
}

impl Rejection {
    pub fn from_status(status: u16) -> Self {
        match status {
            412 => Rejection::Conflict,
            400 => Rejection::Invalid,
            other => Rejection::Other(other),
        }
    }
}

/// One rejected operation inside a batch.
#[derive(Debug, Clone)]
pub struct OperationFailure {
    /// 1-based position of the operation in its batch
    pub position: usize,
    pub record_id: String,
    pub rejection: Rejection,
    pub detail: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.rejection {
            Rejection::Conflict => "already exists".to_string(),
            Rejection::Invalid => "invalid record".to_string(),
            Rejection::Other(status) => format!("status {status}"),
        };
        write!(
            f,
            "operation #{} (record '{}'): {}",
            self.position, self.record_id, reason
        )?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// Aggregated rejections of one batch, raised after the rest of the batch was applied.
#[derive(Debug, Clone)]
pub struct BatchRejection {
    pub total: usize,
    pub failures: Vec<OperationFailure>,
}

impl fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} operations rejected",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}
