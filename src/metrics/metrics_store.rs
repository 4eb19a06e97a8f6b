use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::metrics::{MetricsDelta, MetricsError, MetricsSnapshot, TaskOutcome, TaskState};
use crate::types::TaskId;

#[derive(Debug, Clone)]
struct TaskRecord {
    state: TaskState,
    file_name: String,
    file_size: u64,
    rows_seen: u64,
    rows_inserted: u64,
    rows_rejected: u64,
    last_sequence: u64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>
}

impl TaskRecord {
    fn snapshot(&self, task_id: TaskId, now: DateTime<Utc>) -> MetricsSnapshot {
        let elapsed_seconds = match self.started_at {
            Some(started_at) => {
                let end = self.finished_at.unwrap_or(now);
                (end - started_at).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0
        };

        let throughput = if elapsed_seconds > 0.0 {
            self.rows_inserted as f64 / elapsed_seconds
        } else {
            0.0
        };

        MetricsSnapshot {
            task_id,
            state: self.state,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            rows_seen: self.rows_seen,
            rows_inserted: self.rows_inserted,
            rows_rejected: self.rows_rejected,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            elapsed_seconds,
            throughput,
            error: self.error.clone()
        }
    }
}

/// Keyed registry of ingestion task progress.
///
/// Each task is only ever mutated by the controller that owns it, so entries
/// for different tasks never contend. Entries stay until explicitly purged.
#[derive(Default)]
pub struct MetricsStore {
    tasks: DashMap<TaskId, TaskRecord>
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new()
        }
    }

    /// Creates a `Pending` entry for a newly submitted task.
    pub fn register(&self, task_id: TaskId, file_name: &str, file_size: u64) -> Result<(), MetricsError> {
        match self.tasks.entry(task_id) {
            Entry::Occupied(_) => Err(MetricsError::DuplicateTask(task_id)),
            Entry::Vacant(entry) => {
                entry.insert(TaskRecord {
                    state: TaskState::Pending,
                    file_name: file_name.to_string(),
                    file_size,
                    rows_seen: 0,
                    rows_inserted: 0,
                    rows_rejected: 0,
                    last_sequence: 0,
                    created_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                    error: None
                });

                Ok(())
            }
        }
    }

    pub fn start(&self, task_id: TaskId) -> Result<(), MetricsError> {
        let mut record = self.tasks.get_mut(&task_id).ok_or(MetricsError::NotFound(task_id))?;

        if record.state != TaskState::Pending {
            return Err(MetricsError::InvalidTransition { task_id, from: record.state, to: TaskState::Running });
        }

        record.state = TaskState::Running;
        record.started_at = Some(Utc::now());

        Ok(())
    }

    /// Accumulates a counter delta. Returns `false` when the delta's sequence was
    /// already applied and it was ignored.
    pub fn record(&self, task_id: TaskId, delta: MetricsDelta) -> Result<bool, MetricsError> {
        let mut record = self.tasks.get_mut(&task_id).ok_or(MetricsError::NotFound(task_id))?;

        if record.state != TaskState::Running {
            return Err(MetricsError::NotRunning { task_id, state: record.state });
        }

        if delta.sequence <= record.last_sequence {
            debug!("Ignoring replayed metrics delta [{}] for task [{task_id}]", delta.sequence);
            return Ok(false);
        }

        record.last_sequence = delta.sequence;
        record.rows_seen += delta.rows_seen;
        record.rows_inserted += delta.rows_inserted;
        record.rows_rejected += delta.rows_rejected;

        Ok(true)
    }

    /// Moves a running task to its terminal state. The first recorded error is kept.
    pub fn finish(&self, task_id: TaskId, outcome: TaskOutcome) -> Result<(), MetricsError> {
        let mut record = self.tasks.get_mut(&task_id).ok_or(MetricsError::NotFound(task_id))?;

        let target = match outcome {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed
        };

        if record.state != TaskState::Running {
            return Err(MetricsError::InvalidTransition { task_id, from: record.state, to: target });
        }

        record.state = target;
        record.finished_at = Some(Utc::now());

        if let TaskOutcome::Failed(error) = outcome {
            record.error.get_or_insert(error);
        }

        Ok(())
    }

    pub fn get(&self, task_id: TaskId) -> Result<MetricsSnapshot, MetricsError> {
        self.tasks.get(&task_id)
            .map(|record| record.snapshot(task_id, Utc::now()))
            .ok_or(MetricsError::NotFound(task_id))
    }

    /// Removes a terminal task and returns its final snapshot.
    pub fn purge(&self, task_id: TaskId) -> Result<MetricsSnapshot, MetricsError> {
        let now = Utc::now();

        match self.tasks.remove_if(&task_id, |_, record| record.state.is_terminal()) {
            Some((_, record)) => Ok(record.snapshot(task_id, now)),
            None if self.tasks.contains_key(&task_id) => Err(MetricsError::StillActive(task_id)),
            None => Err(MetricsError::NotFound(task_id))
        }
    }
}
