use super::{IngestConfig, IngestController, IngestService, SubmitRejection};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::{MetricsError, MetricsStore, TaskState};
use crate::models::Transaction;
use crate::storage::testing::ScriptedSink;
use crate::storage::{BulkInsertResult, SqliteStore, StoreError, TransactionSink};

const HEADER: &str = "TRANSACTION_ID,MERCHANT_ID,ZONE,CATEGORY,AMOUNT,TIMESTAMP,CUSTOMER_ID";

fn create_temporary_csv(rows: &[String]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;

    writeln!(file, "{HEADER}")?;

    for row in rows {
        writeln!(file, "{row}")?;
    }

    file.flush()?;

    Ok(file)
}

fn generate_rows(count: usize) -> Vec<String> {
    (1..=count)
        .map(|index| format!("T{index},M{},Z{},groceries,{}.50,2024-01-01T{:02}:00:00Z,C{}", index % 5, index % 3, index, index % 24, index % 7))
        .collect()
}

fn test_config() -> IngestConfig {
    IngestConfig::default().with_retry_delay(Duration::from_millis(5))
}

fn create_service<S: TransactionSink>(sink: Arc<S>, config: IngestConfig) -> (IngestService<S>, Arc<MetricsStore>) {
    let metrics = Arc::new(MetricsStore::new());
    (IngestService::new(sink, metrics.clone(), config), metrics)
}

/// Cancels the given token on its first bulk insert, then behaves like its inner sink.
struct CancellingSink {
    inner: ScriptedSink,
    token: CancellationToken
}

#[async_trait]
impl TransactionSink for CancellingSink {
    async fn bulk_insert(&self, batch: &[Transaction]) -> Result<BulkInsertResult, StoreError> {
        self.token.cancel();
        self.inner.bulk_insert(batch).await
    }
}

#[tokio::test]
async fn test_ingest_counts_valid_and_rejected_rows() -> Result<()> {
    let file = create_temporary_csv(&[
        "T1,M1,Z1,groceries,10.00,2024-01-01T08:00:00Z,C1".to_string(),
        "T2,M1,Z1,groceries,20.00,2024-01-01T09:00:00Z,C1".to_string(),
        "T3,M2,Z2,fuel,bad-amount,2024-01-01T10:00:00Z,C2".to_string()
    ])?;

    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink.clone(), test_config());

    let snapshot = service.ingest(None, file.path()).await?;

    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(snapshot.rows_seen, 3);
    assert_eq!(snapshot.rows_inserted, 2);
    assert_eq!(snapshot.rows_rejected, 1);
    assert!(snapshot.error.is_none());
    assert!(snapshot.finished_at.is_some());
    assert_eq!(sink.stored(), 2);

    Ok(())
}

#[tokio::test]
async fn test_counters_balance_after_every_flush() -> Result<()> {
    let mut rows = generate_rows(25);
    rows.insert(4, "BAD,M1,Z1,groceries,,2024-01-01T00:00:00Z,C1".to_string());
    rows.insert(12, "T3,M1,Z1,groceries,1.00,2024-01-01T00:00:00Z,C1".to_string());
    rows.insert(20, "BROKEN,M1".to_string());
    let file = create_temporary_csv(&rows)?;

    let task_id = Uuid::new_v4();
    let sink = Arc::new(ScriptedSink::new());
    let (service, metrics) = create_service(sink.clone(), test_config().with_batch_size(4));
    sink.observe(metrics.clone(), task_id);

    let snapshot = service.ingest(Some(task_id), file.path()).await?;
    let observed = sink.observed();

    assert!(!observed.is_empty());
    for midway in observed.iter().chain(std::iter::once(&snapshot)) {
        assert_eq!(midway.rows_seen, midway.rows_inserted + midway.rows_rejected);
    }

    assert!(observed.windows(2).all(|pair| pair[0].rows_seen <= pair[1].rows_seen));
    assert_eq!(snapshot.rows_seen, 28);
    assert_eq!(snapshot.rows_inserted, 25);
    assert_eq!(snapshot.rows_rejected, 3);

    Ok(())
}

#[tokio::test]
async fn test_batch_boundaries_follow_the_configured_size() -> Result<()> {
    let below = create_temporary_csv(&generate_rows(9))?;
    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink.clone(), test_config().with_batch_size(10));
    service.ingest(None, below.path()).await?;
    assert_eq!(sink.batch_sizes(), vec![9]);

    let double = create_temporary_csv(&generate_rows(20))?;
    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink.clone(), test_config().with_batch_size(10));
    service.ingest(None, double.path()).await?;
    assert_eq!(sink.batch_sizes(), vec![10, 10]);

    Ok(())
}

#[tokio::test]
async fn test_batch_size_does_not_change_what_is_stored() -> Result<()> {
    let mut rows = generate_rows(30);
    rows.push("T7,M9,Z9,groceries,1.00,2024-01-01T00:00:00Z,C9".to_string());
    let file = create_temporary_csv(&rows)?;

    for batch_size in [1, 7, 1000] {
        let store = Arc::new(SqliteStore::in_memory().await?);
        let (service, _) = create_service(store.clone(), test_config().with_batch_size(batch_size));

        let snapshot = service.ingest(None, file.path()).await?;

        assert_eq!(snapshot.rows_inserted, 30, "batch size {batch_size}");
        assert_eq!(snapshot.rows_rejected, 1, "batch size {batch_size}");
        assert_eq!(store.transaction_count().await?, 30);
    }

    Ok(())
}

#[tokio::test]
async fn test_reingesting_the_same_file_inserts_nothing_new() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(12))?;
    let store = Arc::new(SqliteStore::in_memory().await?);
    let (service, _) = create_service(store.clone(), test_config().with_batch_size(5));

    let first = service.ingest(None, file.path()).await?;
    let second = service.ingest(None, file.path()).await?;

    assert_eq!(first.rows_inserted, 12);
    assert_eq!(second.state, TaskState::Completed);
    assert_eq!(second.rows_seen, 12);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_rejected, 12);
    assert_eq!(store.transaction_count().await?, 12);

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(6))?;
    let sink = Arc::new(ScriptedSink::failing_with(vec![StoreError::Unavailable("locked".to_string())]));
    let (service, _) = create_service(sink.clone(), test_config().with_batch_size(3));

    let snapshot = service.ingest(None, file.path()).await?;

    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(snapshot.rows_inserted, 6);
    assert_eq!(sink.calls(), 3);
    assert_eq!(sink.batch_sizes(), vec![3, 3]);

    Ok(())
}

#[tokio::test]
async fn test_second_consecutive_failure_fails_the_task() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(6))?;
    let sink = Arc::new(ScriptedSink::failing_with(vec![
        StoreError::Unavailable("locked".to_string()),
        StoreError::Unavailable("still locked".to_string())
    ]));
    let (service, _) = create_service(sink.clone(), test_config().with_batch_size(3));

    let snapshot = service.ingest(None, file.path()).await?;
    let error = snapshot.error.ok_or_else(|| anyhow!("Failed task should carry an error"))?;

    assert_eq!(snapshot.state, TaskState::Failed);
    assert!(error.contains("Storage still failing after retry"), "{error}");
    assert_eq!(snapshot.rows_inserted, 0);
    assert_eq!(sink.stored(), 0);
    assert_eq!(sink.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(4))?;
    let sink = Arc::new(ScriptedSink::failing_with(vec![StoreError::Database(sqlx::Error::PoolClosed)]));
    let (service, _) = create_service(sink.clone(), test_config().with_batch_size(2));

    let snapshot = service.ingest(None, file.path()).await?;

    assert_eq!(snapshot.state, TaskState::Failed);
    assert_eq!(sink.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_task_cancelled_before_start_fails_through_running() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(3))?;
    let task_id = Uuid::new_v4();
    let sink = Arc::new(ScriptedSink::new());
    let metrics = Arc::new(MetricsStore::new());
    metrics.register(task_id, "early.csv", 100)?;

    let token = CancellationToken::new();
    token.cancel();

    let controller = IngestController::new(task_id, sink.clone(), metrics.clone(), test_config(), token);
    let state = controller.run(file.path().to_path_buf()).await;
    let snapshot = metrics.get(task_id)?;

    assert_eq!(state, TaskState::Failed);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.finished_at >= snapshot.started_at);
    assert_eq!(snapshot.error.as_deref(), Some("Ingestion was cancelled"));
    assert_eq!(snapshot.rows_seen, 0);
    assert_eq!(sink.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_cancellation_stops_at_the_next_batch_boundary() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(10))?;
    let task_id = Uuid::new_v4();
    let token = CancellationToken::new();
    let sink = Arc::new(CancellingSink { inner: ScriptedSink::new(), token: token.clone() });
    let metrics = Arc::new(MetricsStore::new());
    metrics.register(task_id, "cancel.csv", 100)?;

    let controller = IngestController::new(task_id, sink.clone(), metrics.clone(), test_config().with_batch_size(2), token);
    let state = controller.run(file.path().to_path_buf()).await;
    let snapshot = metrics.get(task_id)?;

    assert_eq!(state, TaskState::Failed);
    assert_eq!(snapshot.rows_inserted, 2);
    assert_eq!(snapshot.rows_seen, snapshot.rows_inserted + snapshot.rows_rejected);
    assert_eq!(sink.inner.batch_sizes(), vec![2]);

    Ok(())
}

#[tokio::test]
async fn test_missing_headers_fail_the_task() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "TRANSACTION_ID,MERCHANT_ID,AMOUNT")?;
    writeln!(file, "T1,M1,10.00")?;
    file.flush()?;

    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink.clone(), test_config());

    let snapshot = service.ingest(None, file.path()).await?;
    let error = snapshot.error.ok_or_else(|| anyhow!("Failed task should carry an error"))?;

    assert_eq!(snapshot.state, TaskState::Failed);
    assert!(error.contains("ZONE"), "{error}");
    assert_eq!(sink.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_submit_rejects_unusable_files() -> Result<()> {
    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink, test_config().with_max_file_size(64));

    let missing = service.submit(None, "/definitely/not/here.csv").err();
    assert!(matches!(missing, Some(SubmitRejection::Unreadable(_))));

    let empty = NamedTempFile::new()?;
    assert_eq!(service.submit(None, empty.path()).err(), Some(SubmitRejection::EmptyFile));

    let large = create_temporary_csv(&generate_rows(5))?;
    assert!(matches!(service.submit(None, large.path()).err(), Some(SubmitRejection::FileTooLarge { limit: 64, .. })));

    let mut latin1 = NamedTempFile::new()?;
    latin1.write_all(b"TRANSACTION_ID,CAF\xc9\n")?;
    latin1.flush()?;
    assert_eq!(service.submit(None, latin1.path()).err(), Some(SubmitRejection::UnsupportedEncoding));

    Ok(())
}

#[tokio::test]
async fn test_submit_rejects_a_reused_task_id() -> Result<()> {
    let file = create_temporary_csv(&generate_rows(2))?;
    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink, test_config());
    let task_id = Uuid::new_v4();

    let submission = service.submit(Some(task_id), file.path())?;
    assert_eq!(service.submit(Some(task_id), file.path()).err(), Some(SubmitRejection::DuplicateTaskId(task_id)));

    assert_eq!(submission.handle.await?, TaskState::Completed);
    assert!(!service.cancel(task_id));

    Ok(())
}

#[tokio::test]
async fn test_metrics_for_unknown_task_are_not_found() {
    let sink = Arc::new(ScriptedSink::new());
    let (service, _) = create_service(sink, test_config());
    let task_id = Uuid::new_v4();

    assert_eq!(service.get_metrics(task_id).err(), Some(MetricsError::NotFound(task_id)));
    assert!(!service.cancel(task_id));
}
