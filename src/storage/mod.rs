mod errors;
mod sqlite_store;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::models::{RejectReason, Transaction};

pub use errors::StoreError;
pub use sqlite_store::SqliteStore;

/// Result of one bulk insert: rows written plus rows the store refused.
///
/// Row-level refusals (e.g. a duplicate transaction ID) do not fail the batch;
/// they are reported by their index within the submitted slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkInsertResult {
    pub inserted: u64,
    pub rejected: Vec<(usize, RejectReason)>
}

/// The single write path into durable storage.
#[async_trait]
pub trait TransactionSink: Send + Sync + 'static {
    /// Writes the batch as one logical unit. An `Err` means nothing from the
    /// batch was committed.
    async fn bulk_insert(&self, batch: &[Transaction]) -> Result<BulkInsertResult, StoreError>;
}
