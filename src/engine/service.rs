use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{IngestConfig, IngestController, SubmitRejection};
use crate::metrics::{MetricsError, MetricsSnapshot, MetricsStore, TaskState};
use crate::storage::TransactionSink;
use crate::types::TaskId;

/// Bytes sniffed from the head of a file to check its encoding.
const ENCODING_SAMPLE: u64 = 2048;

/// An accepted submission. The handle resolves to the task's terminal state.
pub struct Submission {
    pub task_id: TaskId,
    pub handle: JoinHandle<TaskState>
}

/// Intake point for ingestion work: validates submitted files, registers tasks
/// and runs each one on its own tokio task.
pub struct IngestService<S: TransactionSink> {
    sink: Arc<S>,
    metrics: Arc<MetricsStore>,
    config: IngestConfig,
    cancellations: Arc<DashMap<TaskId, CancellationToken>>
}

impl<S: TransactionSink> IngestService<S> {
    pub fn new(sink: Arc<S>, metrics: Arc<MetricsStore>, config: IngestConfig) -> Self {
        Self {
            sink,
            metrics,
            config,
            cancellations: Arc::new(DashMap::new())
        }
    }

    /// Accepts a file for ingestion, or explains why it cannot be processed.
    /// A task ID is generated when the caller does not supply one.
    pub fn submit(&self, task_id: Option<TaskId>, path: impl AsRef<Path>) -> Result<Submission, SubmitRejection> {
        let path = path.as_ref().to_path_buf();
        let file_size = self.validate(&path)?;
        let task_id = task_id.unwrap_or_else(Uuid::new_v4);
        let file_name = path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.metrics.register(task_id, &file_name, file_size)
            .map_err(|_| SubmitRejection::DuplicateTaskId(task_id))?;

        let cancellation = CancellationToken::new();
        self.cancellations.insert(task_id, cancellation.clone());

        let controller = IngestController::new(task_id, self.sink.clone(), self.metrics.clone(), self.config.clone(), cancellation);
        let cancellations = self.cancellations.clone();

        info!("Task [{task_id}] accepted {file_name} ({file_size} bytes)");

        let handle = tokio::spawn(async move {
            let state = controller.run(path).await;
            cancellations.remove(&task_id);
            state
        });

        Ok(Submission { task_id, handle })
    }

    /// Asks a running task to stop at the next batch boundary. Returns `false`
    /// when the task is unknown or already finished.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.cancellations.get(&task_id) {
            Some(token) => {
                warn!("Task [{task_id}] cancellation requested");
                token.cancel();
                true
            }
            None => false
        }
    }

    pub fn get_metrics(&self, task_id: TaskId) -> Result<MetricsSnapshot, MetricsError> {
        self.metrics.get(task_id)
    }

    /// Removes a finished task from the registry and returns its final metrics.
    pub fn purge(&self, task_id: TaskId) -> Result<MetricsSnapshot, MetricsError> {
        self.metrics.purge(task_id)
    }

    /// Submits a file and waits for the task to finish, returning its final metrics.
    #[cfg(test)]
    pub async fn ingest(&self, task_id: Option<TaskId>, path: impl AsRef<Path>) -> anyhow::Result<MetricsSnapshot> {
        let submission = self.submit(task_id, path)?;
        submission.handle.await?;
        Ok(self.metrics.get(submission.task_id)?)
    }

    fn validate(&self, path: &Path) -> Result<u64, SubmitRejection> {
        let unreadable = |error: std::io::Error| SubmitRejection::Unreadable(format!("{}: {error}", path.display()));

        let metadata = fs::metadata(path).map_err(unreadable)?;

        if !metadata.is_file() {
            return Err(SubmitRejection::Unreadable(format!("{} is not a regular file", path.display())));
        }

        let size = metadata.len();

        if size == 0 {
            return Err(SubmitRejection::EmptyFile);
        }

        if size > self.config.max_file_size {
            return Err(SubmitRejection::FileTooLarge { size, limit: self.config.max_file_size });
        }

        let mut sample = Vec::with_capacity(ENCODING_SAMPLE as usize);
        File::open(path)
            .and_then(|file| file.take(ENCODING_SAMPLE).read_to_end(&mut sample))
            .map_err(unreadable)?;

        match std::str::from_utf8(&sample) {
            Ok(_) => Ok(size),
            // The sample may end part-way through a multi-byte character.
            Err(error) if error.error_len().is_none() => Ok(size),
            Err(_) => Err(SubmitRejection::UnsupportedEncoding)
        }
    }
}
