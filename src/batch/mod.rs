mod accumulator;

use thiserror::Error;

use crate::models::RejectReason;
use crate::storage::StoreError;
use crate::types::BatchNumber;

pub use accumulator::BatchAccumulator;

/// Counts reported back to the controller after a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// 1-based sequence number of the flushed batch.
    pub batch: BatchNumber,
    pub size: usize,
    pub inserted: u64,
    /// Rows refused by storage, indexed within the batch.
    pub rejected: Vec<(usize, RejectReason)>
}

#[derive(Debug, Error)]
#[error("Batch [{batch}] of {size} rows failed: {source}")]
pub struct BatchError {
    pub batch: BatchNumber,
    pub size: usize,
    #[source]
    pub source: StoreError
}

impl BatchError {
    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}
