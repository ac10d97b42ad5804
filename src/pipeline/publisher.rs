// src/pipeline/publisher.rs

//! Batch publisher.
//!
//! Collects records from the queue into batches no larger than the store
//! accepts, flushing when a batch is full or when the oldest buffered record
//! has waited `max_wait`. Flushes run as spawned tasks holding a permit of a
//! small worker pool, so collection keeps draining the queue while batches are
//! in flight. With every worker busy, collection waits for a free one and the
//! queue pushes back on producers. Every flush is joined before
//! [`BatchPublisher::run`] returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{AppError, BatchRejection, OperationFailure, Rejection, Result};
use crate::models::{Config, Record};
use crate::pipeline::queue::{QueueAck, QueueConsumer, QueueItem};
use crate::remote::{BatchOperation, OperationResult, RecordStore, ServerInfo};
use crate::storage::PreviousRunSnapshot;
use crate::utils::retry::{Attempt, RetryPolicy, with_backoff};

/// Totals of one publisher run.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Operations the store applied
    pub published: usize,
    /// Records identical to the previous run
    pub skipped: usize,
    /// Batches submitted
    pub batches: usize,
    /// One entry per batch with rejections or a failed submission
    pub errors: Vec<AppError>,
    /// Records as stored, for the next snapshot
    pub applied_records: Vec<Record>,
}

/// Outcome of one flushed batch.
struct BatchOutcome {
    applied: Vec<Record>,
    error: Option<AppError>,
}

/// Drains a [`QueueConsumer`] into store batches.
pub struct BatchPublisher {
    store: Arc<dyn RecordStore>,
    snapshot: Arc<PreviousRunSnapshot>,
    batch_size: usize,
    max_wait: Duration,
    workers: Arc<Semaphore>,
    policy: RetryPolicy,
    skip_unchanged: bool,
}

impl BatchPublisher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        snapshot: Arc<PreviousRunSnapshot>,
        info: &ServerInfo,
        config: &Config,
    ) -> Self {
        Self {
            store,
            snapshot,
            batch_size: info.settings.batch_max_requests.max(1),
            max_wait: config.publisher.max_wait(),
            workers: Arc::new(Semaphore::new(config.publisher.workers.max(1))),
            policy: config.remote.retry_policy(),
            skip_unchanged: config.publisher.skip_unchanged,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publish until the end-of-production marker, then flush and join.
    pub async fn run(self, mut consumer: QueueConsumer) -> Result<PublishReport> {
        let acker = consumer.acker();
        let mut flushes: JoinSet<BatchOutcome> = JoinSet::new();
        let mut report = PublishReport::default();
        let mut batch: Vec<Record> = Vec::with_capacity(self.batch_size);
        let mut deadline: Option<Instant> = None;

        loop {
            let item = match deadline {
                Some(at) => match tokio::time::timeout_at(at, consumer.get()).await {
                    Ok(item) => item,
                    Err(_) => {
                        log::debug!("Flushing {} records after {:?}", batch.len(), self.max_wait);
                        self.flush(&mut flushes, &mut batch, &acker, &mut report)
                            .await;
                        deadline = None;
                        continue;
                    }
                },
                None => consumer.get().await,
            };

            let record = match item {
                Some(QueueItem::Record(record)) => record,
                Some(QueueItem::Done) => break,
                None => {
                    log::warn!("Record queue closed without an end marker");
                    break;
                }
            };

            if self.skip_unchanged && self.snapshot.is_unchanged(&record) {
                log::debug!("Unchanged since last run: {}", record.id);
                report.skipped += 1;
                consumer.task_done();
                continue;
            }

            if batch.is_empty() {
                deadline = Some(Instant::now() + self.max_wait);
            }
            batch.push(record);
            if batch.len() >= self.batch_size {
                self.flush(&mut flushes, &mut batch, &acker, &mut report)
                    .await;
                deadline = None;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut flushes, &mut batch, &acker, &mut report)
                .await;
        }

        while let Some(joined) = flushes.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => BatchOutcome {
                    applied: Vec::new(),
                    error: Some(AppError::unavailable(format!("batch task aborted: {e}"))),
                },
            };
            report.published += outcome.applied.len();
            report.applied_records.extend(outcome.applied);
            if let Some(error) = outcome.error {
                log::error!("{}", error);
                report.errors.push(error);
            }
        }

        log::info!(
            "Published {} records in {} batches ({} unchanged, {} failed batches)",
            report.published,
            report.batches,
            report.skipped,
            report.errors.len()
        );
        Ok(report)
    }

    async fn flush(
        &self,
        flushes: &mut JoinSet<BatchOutcome>,
        batch: &mut Vec<Record>,
        acker: &QueueAck,
        report: &mut PublishReport,
    ) {
        let records = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        report.batches += 1;
        let number = report.batches;

        let operations: Vec<BatchOperation> = records
            .into_iter()
            .map(|record| {
                if self.snapshot.contains(&record.id) {
                    BatchOperation::Update(record)
                } else {
                    BatchOperation::Create(record)
                }
            })
            .collect();

        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                report.errors.push(AppError::unavailable(e));
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let policy = self.policy;
        let acker = acker.clone();
        flushes.spawn(async move {
            let outcome = submit(store.as_ref(), &policy, number, operations, &acker).await;
            drop(permit);
            outcome
        });
    }
}

/// Submit one batch, retrying while the store is unavailable.
///
/// Acknowledges the batch's queue items once the store answered. When every
/// attempt failed, the items stay unacknowledged.
async fn submit(
    store: &dyn RecordStore,
    policy: &RetryPolicy,
    number: usize,
    operations: Vec<BatchOperation>,
    acker: &QueueAck,
) -> BatchOutcome {
    let total = operations.len();
    let context = format!("batch #{number}");
    log::info!("Submitting {} ({} operations) to {}", context, total, store.describe());

    let submitted = with_backoff(policy, &context, |_| {
        let operations = operations.clone();
        async move {
            match store.submit_batch(operations).await {
                Ok(results) => Attempt::Done(results),
                Err(e @ AppError::StoreUnavailable(_)) => Attempt::Retry(e),
                Err(e) => Attempt::Fail(e),
            }
        }
    })
    .await;

    let results = match submitted {
        Ok(results) => results,
        Err(error) => {
            return BatchOutcome {
                applied: Vec::new(),
                error: Some(error),
            };
        }
    };
    acker.ack(total);

    let (applied, failures) = partition_results(&operations, results);
    let error = (!failures.is_empty()).then(|| {
        AppError::Batch(BatchRejection {
            total,
            failures,
        })
    });
    BatchOutcome { applied, error }
}

/// Split per-operation results into stored records and rejections.
fn partition_results(
    operations: &[BatchOperation],
    results: Vec<OperationResult>,
) -> (Vec<Record>, Vec<OperationFailure>) {
    let mut applied = Vec::with_capacity(operations.len());
    let mut failures = Vec::new();
    for (position, (operation, result)) in operations.iter().zip(results).enumerate() {
        if result.is_success() {
            applied.push(
                result
                    .stored_record()
                    .unwrap_or_else(|| operation.record().clone()),
            );
        } else {
            failures.push(OperationFailure {
                position: position + 1,
                record_id: operation.record().id.clone(),
                rejection: Rejection::from_status(result.status),
                detail: result
                    .body
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    (applied, failures)
}
