use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Monetary;

/// A normalized, validated transaction ready to be persisted.
///
/// Instances are only produced by the row decoder, which guarantees that the
/// amount is non-negative, the timestamp is an absolute UTC instant and the
/// identifying fields are non-empty. Once persisted a transaction is never
/// modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Caller-assigned unique transaction ID.
    pub transaction_id: String,
    /// The merchant that took the payment.
    pub merchant_id: String,
    /// Upper-cased zone identifier.
    pub zone: String,
    /// Normalized category name.
    pub category: String,
    /// Fixed-point amount, never negative.
    pub amount: Monetary,
    pub timestamp: DateTime<Utc>,
    /// Customer identifier, absent when the source column was blank.
    pub customer_id: Option<String>
}
