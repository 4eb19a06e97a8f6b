use thiserror::Error;

use crate::metrics::TaskState;
use crate::types::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Task [{0}] was not found")]
    NotFound(TaskId),
    #[error("Task [{0}] is already registered")]
    DuplicateTask(TaskId),
    #[error("Task [{task_id}] cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState
    },
    #[error("Task [{task_id}] is {state:?} and cannot accept counter updates")]
    NotRunning {
        task_id: TaskId,
        state: TaskState
    },
    #[error("Task [{0}] is still active and cannot be purged")]
    StillActive(TaskId)
}
