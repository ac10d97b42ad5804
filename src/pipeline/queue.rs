// src/pipeline/queue.rs

//! Bounded record queue between the crawl and the publisher.
//!
//! Every record put counts as unfinished work until the consumer acknowledges
//! it; [`QueueProducer::join`] waits for that count to reach zero. A single
//! [`QueueItem::Done`] marks the end of production.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, mpsc};

use crate::error::{AppError, Result};
use crate::models::Record;

/// What travels through the queue.
#[derive(Debug)]
pub enum QueueItem {
    Record(Record),
    /// No record follows
    Done,
}

#[derive(Default)]
struct Progress {
    unfinished: AtomicUsize,
    drained: Notify,
}

/// Create a queue holding at most `capacity` items.
pub fn channel(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let progress = Arc::new(Progress::default());
    (
        QueueProducer {
            tx,
            progress: Arc::clone(&progress),
        },
        QueueConsumer { rx, progress },
    )
}

/// Sending side, cloned by every producer.
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<QueueItem>,
    progress: Arc<Progress>,
}

impl QueueProducer {
    /// Enqueue a record, waiting while the queue is full.
    pub async fn put(&self, record: Record) -> Result<()> {
        self.progress.unfinished.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueueItem::Record(record)).await.is_err() {
            QueueAck {
                progress: Arc::clone(&self.progress),
            }
            .ack(1);
            return Err(AppError::QueueClosed);
        }
        Ok(())
    }

    /// Signal that production is over.
    pub async fn finish(&self) -> Result<()> {
        self.tx
            .send(QueueItem::Done)
            .await
            .map_err(|_| AppError::QueueClosed)
    }

    /// Records put but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.progress.unfinished.load(Ordering::SeqCst)
    }

    /// Wait until every record put so far has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.progress.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent ack cannot be missed.
            notified.as_mut().enable();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Receiving side.
pub struct QueueConsumer {
    rx: mpsc::Receiver<QueueItem>,
    progress: Arc<Progress>,
}

impl QueueConsumer {
    /// Next item, or `None` once every producer is gone.
    pub async fn get(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Acknowledge one record.
    pub fn task_done(&self) {
        self.acker().ack(1);
    }

    /// Handle for acknowledging records from other tasks.
    pub fn acker(&self) -> QueueAck {
        QueueAck {
            progress: Arc::clone(&self.progress),
        }
    }
}

/// Acknowledges processed records.
#[derive(Clone)]
pub struct QueueAck {
    progress: Arc<Progress>,
}

impl QueueAck {
    pub fn ack(&self, count: usize) {
        if count == 0 {
            return;
        }
        let previous = self
            .progress
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(count)))
            .unwrap_or_default();
        if previous <= count {
            self.progress.drained.notify_waiters();
        }
    }
}
