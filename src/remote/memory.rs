// src/remote/memory.rs

//! In-process record store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;

use super::{BatchOperation, OperationResult, RecordFilter, RecordStore, ServerInfo, ServerSettings};
use crate::error::{AppError, Result};
use crate::models::Record;

#[derive(Default)]
struct State {
    records: BTreeMap<String, Record>,
    clock: u64,
    batch_sizes: Vec<usize>,
    failures_left: u32,
}

impl State {
    fn store(&mut self, mut record: Record) -> Record {
        self.clock += 1;
        record.last_modified = Some(self.clock);
        self.records.insert(record.id.clone(), record.clone());
        record
    }
}

/// [`RecordStore`] kept in memory, with the same conditional-create rules
/// as the HTTP store.
pub struct MemoryStore {
    info: ServerInfo,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(batch_max_requests: usize) -> Self {
        Self {
            info: ServerInfo {
                settings: ServerSettings { batch_max_requests },
            },
            state: Mutex::new(State::default()),
        }
    }

    /// Seed the store with already published records.
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        {
            let mut state = self.lock();
            for record in records {
                state.store(record);
            }
        }
        self
    }

    /// Make the next `count` batch submissions fail as a whole.
    pub fn fail_next_batches(&self, count: u32) {
        self.lock().failures_left = count;
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.values().cloned().collect()
    }

    /// Number of operations of every accepted batch, in submission order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn server_info(&self) -> Result<ServerInfo> {
        Ok(self.info.clone())
    }

    async fn get_records(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let state = self.lock();
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(sort) = &filter.sort {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort.as_str(), false),
            };
            match field {
                "download.date" => records.sort_by(|a, b| a.download.date.cmp(&b.download.date)),
                "last_modified" => records.sort_by_key(|r| r.last_modified),
                "target.version" => records.sort_by(|a, b| a.target.version.cmp(&b.target.version)),
                other => return Err(AppError::validation(format!("unsupported sort field '{other}'"))),
            }
            if descending {
                records.reverse();
            }
        }
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn submit_batch(&self, operations: Vec<BatchOperation>) -> Result<Vec<OperationResult>> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(AppError::unavailable("memory store refused the batch"));
        }
        state.batch_sizes.push(operations.len());

        let results = operations
            .into_iter()
            .map(|operation| match operation {
                BatchOperation::Create(record) if state.records.contains_key(&record.id) => {
                    OperationResult {
                        status: 412,
                        body: json!({
                            "code": 412,
                            "error": "Precondition Failed",
                            "message": format!("Resource '{}' already exists", record.id),
                        }),
                    }
                }
                BatchOperation::Create(record) => OperationResult {
                    status: 201,
                    body: json!({"data": state.store(record)}),
                },
                BatchOperation::Update(record) => OperationResult {
                    status: 200,
                    body: json!({"data": state.store(record)}),
                },
            })
            .collect();
        Ok(results)
    }

    fn describe(&self) -> String {
        "memory store".to_string()
    }
}
