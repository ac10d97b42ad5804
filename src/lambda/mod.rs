// src/lambda/mod.rs

//! AWS Lambda handler for the indexer.
//!
//! Two kinds of invocation share one function:
//! 1. S3 object notifications, directly or wrapped in SNS messages: every
//!    announced object goes through the single-object path
//! 2. Anything else (e.g. a scheduled event): a full crawl, with the
//!    previous-run snapshot kept in S3

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::config::load_config;
use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{ArtifactEvent, EventOutcome, EventProcessor, run_crawler};
use crate::remote::{HttpRecordStore, RecordStore};
use crate::services::{ArchiveSource, HttpArchiveSource};
use crate::storage::S3SnapshotStore;

/// Scheduled crawl payload.
#[derive(Debug, Default, Deserialize)]
pub struct CrawlRequest {
    /// Products to crawl instead of the configured ones
    #[serde(default)]
    pub products: Vec<String>,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct IndexResponse {
    pub success: bool,

    /// Notifications handled
    pub events: usize,

    /// Records written
    pub published: usize,

    /// Records that were already stored
    pub existing: usize,

    /// Notifications waiting for their metadata
    pub deferred: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub execution_time_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    #[serde(rename = "EventSource")]
    event_source: Option<String>,
    #[serde(rename = "Sns")]
    sns: Option<SnsMessage>,
    #[serde(rename = "eventTime")]
    event_time: Option<DateTime<Utc>>,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct SnsMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    #[serde(default)]
    size: u64,
}

/// Main Lambda handler function.
///
/// A failed notification is returned as an error so that it gets delivered
/// again; a failed crawl is reported in the response.
#[instrument(skip(event))]
pub async fn handler(event: LambdaEvent<Value>) -> std::result::Result<IndexResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (payload, _context) = event.into_parts();

    if payload.get("Records").is_some() {
        let mut response = handle_notifications(&payload).await.map_err(|e| {
            error!("Notification processing failed: {}", e);
            LambdaError::from(e.to_string())
        })?;
        response.execution_time_ms = start.elapsed().as_millis() as u64;
        return Ok(response);
    }

    let request: CrawlRequest = serde_json::from_value(payload).unwrap_or_default();
    info!("Starting crawl: products={:?}", request.products);
    let mut response = match run_crawl(&request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Crawl failed: {}", e);
            IndexResponse {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };
    response.execution_time_ms = start.elapsed().as_millis() as u64;
    info!(
        "Crawl finished: success={}, {} published in {}ms",
        response.success, response.published, response.execution_time_ms
    );
    Ok(response)
}

/// Unwrap S3 and SNS-wrapped S3 notification records.
pub fn extract_events(payload: &Value) -> Result<Vec<ArtifactEvent>> {
    let notification: Notification = serde_json::from_value(payload.clone())?;
    let mut events = Vec::new();
    for record in notification.records {
        collect_events(record, &mut events)?;
    }
    Ok(events)
}

fn collect_events(record: NotificationRecord, events: &mut Vec<ArtifactEvent>) -> Result<()> {
    if record.event_source.as_deref() == Some("aws:sns") {
        if let Some(sns) = record.sns {
            let inner: Notification = serde_json::from_str(&sns.message)?;
            for record in inner.records {
                collect_events(record, events)?;
            }
        }
        return Ok(());
    }
    match (record.s3, record.event_time) {
        (Some(s3), Some(event_time)) => events.push(ArtifactEvent {
            key: s3.object.key,
            size: s3.object.size,
            event_time,
        }),
        _ => warn!("Skipping notification record without an S3 object"),
    }
    Ok(())
}

fn lambda_config() -> Result<Config> {
    let path = std::env::var_os("CONFIG_PATH").map(PathBuf::from);
    load_config(path.as_deref())
}

fn clients(config: &Config) -> Result<(Arc<dyn ArchiveSource>, Arc<dyn RecordStore>)> {
    let source: Arc<dyn ArchiveSource> = Arc::new(HttpArchiveSource::new(&config.archive)?);
    let store: Arc<dyn RecordStore> =
        Arc::new(HttpRecordStore::new(&config.remote, &config.archive.user_agent)?);
    Ok((source, store))
}

async fn handle_notifications(payload: &Value) -> Result<IndexResponse> {
    let events = extract_events(payload)?;
    let config = lambda_config()?;
    let (source, store) = clients(&config)?;
    let processor = EventProcessor::new(&config, source, store);

    let mut response = IndexResponse {
        success: true,
        events: events.len(),
        ..Default::default()
    };
    for event in &events {
        match processor.process(event).await? {
            EventOutcome::Published { created, existing } => {
                response.published += created;
                response.existing += existing;
            }
            EventOutcome::Deferred => response.deferred += 1,
            EventOutcome::Ignored => {}
        }
    }
    info!(
        "{} notifications: {} created, {} existing, {} deferred",
        response.events, response.published, response.existing, response.deferred
    );
    Ok(response)
}

async fn run_crawl(request: &CrawlRequest) -> Result<IndexResponse> {
    let mut config = lambda_config()?;
    if !request.products.is_empty() {
        config.crawl.products = request.products.clone();
    }
    let (source, store) = clients(&config)?;
    let snapshots = S3SnapshotStore::from_env().await?;

    let summary = run_crawler(&config, source, store, Some(&snapshots))
        .await?
        .into_result()?;
    Ok(IndexResponse {
        success: true,
        published: summary.publish.published,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn s3_record(key: &str, size: u64) -> Value {
        json!({
            "eventSource": "aws:s3",
            "eventTime": "2017-08-09T12:00:00.000Z",
            "s3": {"object": {"key": key, "size": size}}
        })
    }

    #[test]
    fn extracts_direct_s3_records() {
        let payload = json!({"Records": [s3_record("pub/firefox/a.tar.bz2", 10)]});
        let events = extract_events(&payload).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "pub/firefox/a.tar.bz2");
        assert_eq!(events[0].size, 10);
        assert_eq!(events[0].event_time.to_rfc3339(), "2017-08-09T12:00:00+00:00");
    }

    #[test]
    fn unwraps_sns_messages() {
        let inner = json!({"Records": [s3_record("pub/a", 1), s3_record("pub/b", 2)]});
        let payload = json!({"Records": [{
            "EventSource": "aws:sns",
            "Sns": {"Message": inner.to_string()}
        }]});
        let keys: Vec<String> = extract_events(&payload)
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["pub/a", "pub/b"]);
    }

    #[test]
    fn skips_records_without_object() {
        let payload = json!({"Records": [{"eventSource": "aws:s3"}]});
        assert!(extract_events(&payload).unwrap().is_empty());
    }
}
