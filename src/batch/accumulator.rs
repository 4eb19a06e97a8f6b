use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{BatchError, FlushOutcome};
use crate::models::Transaction;
use crate::storage::TransactionSink;
use crate::types::BatchNumber;

/// Buffers validated transactions and writes them in fixed-size bulk inserts.
///
/// A failed flush leaves the buffer untouched so the identical batch can be
/// retried; only a successful flush clears it and advances the batch number.
pub struct BatchAccumulator<S: TransactionSink> {
    sink: Arc<S>,
    batch_size: usize,
    buffer: Vec<Transaction>,
    flushed: BatchNumber
}

impl<S: TransactionSink> BatchAccumulator<S> {
    pub fn new(sink: Arc<S>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);

        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            flushed: 0
        }
    }

    /// Buffers one transaction, flushing when the batch is full.
    pub async fn push(&mut self, transaction: Transaction) -> Result<Option<FlushOutcome>, BatchError> {
        self.buffer.push(transaction);

        if self.buffer.len() >= self.batch_size {
            return self.flush().await;
        }

        Ok(None)
    }

    /// Writes whatever is buffered as one batch. Returns `None` when the buffer is empty.
    pub async fn flush(&mut self) -> Result<Option<FlushOutcome>, BatchError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let batch = self.flushed + 1;
        let size = self.buffer.len();

        match self.sink.bulk_insert(&self.buffer).await {
            Ok(result) => {
                self.flushed = batch;
                self.buffer.clear();

                debug!("Flushed batch [{batch}]: {size} rows, {} inserted, {} rejected", result.inserted, result.rejected.len());

                Ok(Some(FlushOutcome {
                    batch,
                    size,
                    inserted: result.inserted,
                    rejected: result.rejected
                }))
            }
            Err(source) => {
                warn!("Batch [{batch}] of {size} rows failed to flush: {source}");
                Err(BatchError { batch, size, source })
            }
        }
    }

    /// Drops buffered rows that were never flushed, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        discarded
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn batches_flushed(&self) -> BatchNumber {
        self.flushed
    }
}
