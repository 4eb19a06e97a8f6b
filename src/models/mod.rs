mod rejection;
mod transaction;

use serde::Serialize;

pub use rejection::{RejectKind, RejectReason, RejectedRow};
pub use transaction::Transaction;

/// A known merchant from the externally maintained reference set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Merchant {
    pub merchant_id: String,
    pub name: Option<String>
}
