use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::metrics::{MetricsSnapshot, MetricsStore};
use crate::models::{RejectReason, Transaction};
use crate::storage::{BulkInsertResult, StoreError, TransactionSink};
use crate::types::TaskId;

/// In-memory sink with scripted failures, used to drive the pipeline in tests.
///
/// Each call to `bulk_insert` first pops the next scripted error, if any.
/// Otherwise rows are kept by transaction ID and duplicates are rejected per row.
#[derive(Default)]
pub struct ScriptedSink {
    failures: Mutex<VecDeque<StoreError>>,
    stored: Mutex<HashSet<String>>,
    batch_sizes: Mutex<Vec<usize>>,
    observed: Mutex<Vec<MetricsSnapshot>>,
    observer: Mutex<Option<(Arc<MetricsStore>, TaskId)>>,
    calls: AtomicUsize
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(errors: Vec<StoreError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    /// Captures the task's metrics snapshot at the start of every bulk insert.
    pub fn observe(&self, metrics: Arc<MetricsStore>, task_id: TaskId) {
        *self.observer.lock().unwrap() = Some((metrics, task_id));
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn stored(&self) -> usize {
        self.stored.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn observed(&self) -> Vec<MetricsSnapshot> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionSink for ScriptedSink {
    async fn bulk_insert(&self, batch: &[Transaction]) -> Result<BulkInsertResult, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((metrics, task_id)) = self.observer.lock().unwrap().as_ref() {
            if let Ok(snapshot) = metrics.get(*task_id) {
                self.observed.lock().unwrap().push(snapshot);
            }
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut stored = self.stored.lock().unwrap();
        let mut result = BulkInsertResult::default();

        for (index, transaction) in batch.iter().enumerate() {
            if stored.insert(transaction.transaction_id.clone()) {
                result.inserted += 1;
            } else {
                result.rejected.push((index, RejectReason::DuplicateTransaction(transaction.transaction_id.clone())));
            }
        }

        self.batch_sizes.lock().unwrap().push(batch.len());

        Ok(result)
    }
}
