use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchAccumulator, BatchError, FlushOutcome};
use crate::decoder::{DecodeError, DecodedRow, DecoderOptions, RowDecoder};
use crate::engine::{IngestConfig, IngestError};
use crate::metrics::{MetricsDelta, MetricsStore, TaskOutcome, TaskState};
use crate::models::RejectKind;
use crate::storage::TransactionSink;
use crate::types::TaskId;

type DecoderItem = Result<DecodedRow, DecodeError>;

/// Counts not yet published to the metrics store.
#[derive(Debug, Default)]
struct Progress {
    sequence: u64,
    decode_rejected: u64,
    rejections: HashMap<RejectKind, u64>
}

impl Progress {
    fn tally(&mut self, kind: RejectKind) {
        *self.rejections.entry(kind).or_default() += 1;
    }
}

/// Drives one file through decode → accumulate → flush and owns the task's
/// state transitions.
///
/// Decoding runs on a blocking thread and feeds a bounded channel, so at most
/// `channel_capacity` rows plus one batch are held in memory at any time.
pub struct IngestController<S: TransactionSink> {
    task_id: TaskId,
    sink: Arc<S>,
    metrics: Arc<MetricsStore>,
    config: IngestConfig,
    cancellation: CancellationToken
}

impl<S: TransactionSink> IngestController<S> {
    pub fn new(task_id: TaskId, sink: Arc<S>, metrics: Arc<MetricsStore>, config: IngestConfig, cancellation: CancellationToken) -> Self {
        Self {
            task_id,
            sink,
            metrics,
            config,
            cancellation
        }
    }

    /// Runs the task to a terminal state and returns that state.
    pub async fn run(self, path: PathBuf) -> TaskState {
        let task_id = self.task_id;

        if let Err(error) = self.metrics.start(task_id) {
            error!("Task [{task_id}] could not start: {error}");
            return self.conclude(Err(error.into()));
        }

        // Failing is only legal from Running, so a pre-cancelled task starts first.
        if self.cancellation.is_cancelled() {
            return self.conclude(Err(IngestError::Cancelled));
        }

        info!("Task [{task_id}] started ingesting {}", path.display());

        let result = self.ingest(path).await;
        self.conclude(result)
    }

    fn conclude(&self, result: Result<(), IngestError>) -> TaskState {
        let task_id = self.task_id;

        let outcome = match result {
            Ok(()) => TaskOutcome::Completed,
            Err(error) => {
                error!("Task [{task_id}] failed: {error}");
                TaskOutcome::Failed(error.to_string())
            }
        };

        if let Err(error) = self.metrics.finish(task_id, outcome) {
            error!("Task [{task_id}] could not record its final state: {error}");
        }

        match self.metrics.get(task_id) {
            Ok(snapshot) => {
                info!(
                    "Task [{task_id}] {:?}: seen {}, inserted {}, rejected {} in {:.3}s ({:.0} rows/s)",
                    snapshot.state, snapshot.rows_seen, snapshot.rows_inserted, snapshot.rows_rejected,
                    snapshot.elapsed_seconds, snapshot.throughput
                );
                snapshot.state
            }
            Err(_) => TaskState::Failed
        }
    }

    async fn ingest(&self, path: PathBuf) -> Result<(), IngestError> {
        let (sender, mut receiver) = mpsc::channel::<DecoderItem>(self.config.channel_capacity);
        let decoder_handle = spawn_decoder(path, self.config.decoder, sender);

        let mut accumulator = BatchAccumulator::new(self.sink.clone(), self.config.batch_size);
        let mut progress = Progress::default();

        let result = self.consume(&mut receiver, &mut accumulator, &mut progress).await;

        // Closing the channel unblocks the decoder thread when we stopped early.
        drop(receiver);

        if result.is_err() {
            let discarded = accumulator.discard();
            if discarded > 0 {
                warn!("Task [{}] discarded {discarded} unflushed rows", self.task_id);
            }
        }

        info!(
            "Task [{}] flushed {} batches, rejections by kind: {:?}",
            self.task_id, accumulator.batches_flushed(), progress.rejections
        );

        match decoder_handle.await {
            Err(join_error) if result.is_ok() => Err(IngestError::DecoderCrashed(join_error.to_string())),
            _ => result
        }
    }

    async fn consume(&self, receiver: &mut mpsc::Receiver<DecoderItem>, accumulator: &mut BatchAccumulator<S>, progress: &mut Progress) -> Result<(), IngestError> {
        while let Some(item) = receiver.recv().await {
            // Only between batches, so a batch is never abandoned half-written.
            if accumulator.is_empty() && self.cancellation.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            match item? {
                DecodedRow::Rejected(row) => {
                    debug!("Task [{}] line [{}] rejected as {:?}: {}", self.task_id, row.line, row.reason.kind(), row.reason);
                    progress.decode_rejected += 1;
                    progress.tally(row.reason.kind());
                }
                DecodedRow::Valid(transaction) => {
                    let flushed = match accumulator.push(transaction).await {
                        Ok(flushed) => flushed,
                        Err(error) => self.retry(accumulator, error).await?
                    };

                    if let Some(outcome) = flushed {
                        self.publish(progress, Some(&outcome))?;
                    }
                }
            }
        }

        let flushed = match accumulator.flush().await {
            Ok(flushed) => flushed,
            Err(error) => self.retry(accumulator, error).await?
        };

        self.publish(progress, flushed.as_ref())
    }

    /// Retries a failed batch once after the configured delay. Non-transient
    /// failures are not retried.
    async fn retry(&self, accumulator: &mut BatchAccumulator<S>, error: BatchError) -> Result<Option<FlushOutcome>, IngestError> {
        if !error.is_transient() {
            return Err(IngestError::Storage(error));
        }

        warn!("Task [{}] retrying batch [{}] in {:?}: {}", self.task_id, error.batch, self.config.retry_delay, error.source);
        sleep(self.config.retry_delay).await;

        accumulator.flush().await.map_err(IngestError::RetryExhausted)
    }

    /// Publishes a flush together with any decode rejections seen since the last publish.
    fn publish(&self, progress: &mut Progress, outcome: Option<&FlushOutcome>) -> Result<(), IngestError> {
        let (size, inserted, rejected) = outcome
            .map(|outcome| (outcome.size as u64, outcome.inserted, outcome.rejected.len() as u64))
            .unwrap_or_default();

        if size == 0 && progress.decode_rejected == 0 {
            return Ok(());
        }

        if let Some(outcome) = outcome {
            for (index, reason) in &outcome.rejected {
                debug!("Task [{}] batch [{}] row {index} refused by storage: {reason}", self.task_id, outcome.batch);
                progress.tally(reason.kind());
            }
        }

        progress.sequence += 1;

        let delta = MetricsDelta {
            sequence: progress.sequence,
            rows_seen: size + progress.decode_rejected,
            rows_inserted: inserted,
            rows_rejected: rejected + progress.decode_rejected
        };

        progress.decode_rejected = 0;
        self.metrics.record(self.task_id, delta)?;

        Ok(())
    }
}

fn spawn_decoder(path: PathBuf, options: DecoderOptions, sender: mpsc::Sender<DecoderItem>) -> JoinHandle<()> {
    spawn_blocking(move || {
        let decoder = match RowDecoder::open(&path, options) {
            Ok(decoder) => decoder,
            Err(error) => {
                if sender.blocking_send(Err(error)).is_err() {
                    debug!("Decoder for {} stopped before reporting its error", path.display());
                }
                return;
            }
        };

        for item in decoder {
            if sender.blocking_send(item).is_err() {
                break;
            }
        }
    })
}
