use thiserror::Error;

use crate::batch::BatchError;
use crate::decoder::DecodeError;
use crate::metrics::MetricsError;
use crate::types::TaskId;

/// Fatal task errors. Any of these moves the task to `Failed`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Unrecoverable storage error: {0}")]
    Storage(BatchError),
    #[error("Storage still failing after retry: {0}")]
    RetryExhausted(BatchError),
    #[error("Ingestion was cancelled")]
    Cancelled,
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("Decoder thread stopped unexpectedly: {0}")]
    DecoderCrashed(String)
}

/// Reasons `submit` refuses a file before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitRejection {
    #[error("File is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge {
        size: u64,
        limit: u64
    },
    #[error("File is empty")]
    EmptyFile,
    #[error("File cannot be read: {0}")]
    Unreadable(String),
    #[error("File encoding is not supported, expected UTF-8")]
    UnsupportedEncoding,
    #[error("Task [{0}] already exists")]
    DuplicateTaskId(TaskId)
}
