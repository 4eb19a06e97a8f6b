mod errors;
mod metrics_store;
#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::TaskId;

pub use errors::MetricsError;
pub use metrics_store::MetricsStore;

/// Lifecycle of an ingestion task. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Counter increments published by the controller after a batch flush.
///
/// `sequence` orders deltas for one task; a delta whose sequence has already
/// been applied is ignored, which makes re-publishing safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsDelta {
    pub sequence: u64,
    pub rows_seen: u64,
    pub rows_inserted: u64,
    pub rows_rejected: u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String)
}

/// Point-in-time view of a task. Elapsed time and throughput are derived on read.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub file_name: String,
    pub file_size: u64,
    pub rows_seen: u64,
    pub rows_inserted: u64,
    pub rows_rejected: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
    /// Inserted rows per second, zero while no time has elapsed.
    pub throughput: f64,
    pub error: Option<String>
}
