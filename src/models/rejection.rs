use serde::Serialize;
use thiserror::Error;

/// Broad classification of why a row never became a persisted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    MalformedField,
    FailedValidation,
    ConstraintViolation
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Row could not be read: {0}")]
    MalformedRow(String),
    #[error("Required field [{0}] is missing or blank")]
    MissingField(&'static str),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid timestamp [{0}]")]
    InvalidTimestamp(String),
    #[error("Amount [{0}] is negative")]
    NegativeAmount(String),
    #[error("Amount [{amount}] exceeds the maximum of {limit}")]
    AmountTooLarge {
        amount: String,
        limit: String
    },
    #[error("Timestamp [{0}] is in the future")]
    FutureTimestamp(String),
    #[error("Transaction [{0}] already exists")]
    DuplicateTransaction(String),
    #[error("Storage constraint violated: {0}")]
    Constraint(String)
}

impl RejectReason {
    pub fn kind(&self) -> RejectKind {
        match self {
            Self::MalformedRow(_)
            | Self::MissingField(_)
            | Self::InvalidAmount(_)
            | Self::InvalidTimestamp(_) => RejectKind::MalformedField,
            Self::NegativeAmount(_)
            | Self::AmountTooLarge { .. }
            | Self::FutureTimestamp(_) => RejectKind::FailedValidation,
            Self::DuplicateTransaction(_)
            | Self::Constraint(_) => RejectKind::ConstraintViolation
        }
    }
}

/// A raw input line that failed decoding or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// 1-based line number in the source file.
    pub line: u64,
    pub fields: Vec<String>,
    pub reason: RejectReason
}
