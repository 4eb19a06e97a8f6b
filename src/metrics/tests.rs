use super::{MetricsDelta, MetricsError, MetricsStore, TaskOutcome, TaskState};
use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

fn delta(sequence: u64, rows_seen: u64, rows_inserted: u64, rows_rejected: u64) -> MetricsDelta {
    MetricsDelta { sequence, rows_seen, rows_inserted, rows_rejected }
}

#[test]
fn test_metrics_follow_the_task_lifecycle() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();

    store.register(task_id, "upload.csv", 1024)?;

    let pending = store.get(task_id)?;
    assert_eq!(pending.state, TaskState::Pending);
    assert_eq!(pending.elapsed_seconds, 0.0);
    assert_eq!(pending.throughput, 0.0);

    store.start(task_id)?;
    store.record(task_id, delta(1, 10, 9, 1))?;
    store.record(task_id, delta(2, 5, 5, 0))?;
    store.finish(task_id, TaskOutcome::Completed)?;

    let completed = store.get(task_id)?;

    assert_eq!(completed.state, TaskState::Completed);
    assert_eq!(completed.file_name, "upload.csv");
    assert_eq!(completed.file_size, 1024);
    assert_eq!((completed.rows_seen, completed.rows_inserted, completed.rows_rejected), (15, 14, 1));
    assert!(completed.finished_at.is_some());
    assert!(completed.error.is_none());

    Ok(())
}

#[test]
fn test_metrics_ignore_replayed_deltas() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();
    store.register(task_id, "upload.csv", 0)?;
    store.start(task_id)?;

    assert!(store.record(task_id, delta(1, 3, 3, 0))?);
    assert!(!store.record(task_id, delta(1, 3, 3, 0))?);
    assert!(!store.record(task_id, delta(0, 100, 100, 0))?);

    assert_eq!(store.get(task_id)?.rows_seen, 3);

    Ok(())
}

#[test]
fn test_metrics_reject_unknown_tasks_and_duplicates() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();

    assert_eq!(store.get(task_id).unwrap_err(), MetricsError::NotFound(task_id));

    store.register(task_id, "a.csv", 0)?;

    assert_eq!(store.register(task_id, "b.csv", 0), Err(MetricsError::DuplicateTask(task_id)));
    assert!(matches!(store.record(task_id, delta(1, 1, 1, 0)), Err(MetricsError::NotRunning { .. })));

    Ok(())
}

#[test]
fn test_terminal_states_are_final() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();
    store.register(task_id, "a.csv", 0)?;

    assert!(matches!(store.finish(task_id, TaskOutcome::Completed), Err(MetricsError::InvalidTransition { .. })));

    store.start(task_id)?;
    store.finish(task_id, TaskOutcome::Failed("first failure".into()))?;

    assert!(matches!(store.finish(task_id, TaskOutcome::Failed("second failure".into())), Err(MetricsError::InvalidTransition { .. })));
    assert!(matches!(store.finish(task_id, TaskOutcome::Completed), Err(MetricsError::InvalidTransition { .. })));
    assert!(matches!(store.start(task_id), Err(MetricsError::InvalidTransition { .. })));
    assert!(matches!(store.record(task_id, delta(1, 1, 1, 0)), Err(MetricsError::NotRunning { .. })));

    let failed = store.get(task_id)?;

    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.error.as_deref(), Some("first failure"));

    Ok(())
}

#[test]
fn test_pending_tasks_cannot_finish_without_starting() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();
    store.register(task_id, "a.csv", 0)?;

    assert_eq!(
        store.finish(task_id, TaskOutcome::Failed("cancelled".into())).unwrap_err(),
        MetricsError::InvalidTransition { task_id, from: TaskState::Pending, to: TaskState::Failed }
    );
    assert_eq!(
        store.finish(task_id, TaskOutcome::Completed).unwrap_err(),
        MetricsError::InvalidTransition { task_id, from: TaskState::Pending, to: TaskState::Completed }
    );

    let pending = store.get(task_id)?;

    assert_eq!(pending.state, TaskState::Pending);
    assert!(pending.error.is_none());
    assert!(pending.finished_at.is_none());

    Ok(())
}

#[test]
fn test_throughput_is_derived_from_elapsed_time() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();
    store.register(task_id, "a.csv", 0)?;
    store.start(task_id)?;
    store.record(task_id, delta(1, 500, 500, 0))?;

    thread::sleep(Duration::from_millis(20));
    store.finish(task_id, TaskOutcome::Completed)?;

    let first = store.get(task_id)?;
    thread::sleep(Duration::from_millis(20));
    let second = store.get(task_id)?;

    assert!(first.elapsed_seconds > 0.0);
    assert_eq!(first.elapsed_seconds, second.elapsed_seconds);
    assert!((first.throughput - 500.0 / first.elapsed_seconds).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_only_terminal_tasks_can_be_purged() -> Result<()> {
    let store = MetricsStore::new();
    let task_id = Uuid::new_v4();
    store.register(task_id, "a.csv", 0)?;
    store.start(task_id)?;

    assert_eq!(store.purge(task_id).unwrap_err(), MetricsError::StillActive(task_id));

    store.finish(task_id, TaskOutcome::Completed)?;

    assert_eq!(store.purge(task_id)?.state, TaskState::Completed);
    assert_eq!(store.get(task_id).unwrap_err(), MetricsError::NotFound(task_id));
    assert_eq!(store.purge(task_id).unwrap_err(), MetricsError::NotFound(task_id));

    Ok(())
}

#[test]
fn test_concurrent_tasks_do_not_interfere() -> Result<()> {
    let store = Arc::new(MetricsStore::new());
    let task_ids: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();

    let handles: Vec<_> = task_ids.iter().copied()
        .map(|task_id| {
            let store = store.clone();
            thread::spawn(move || -> Result<(), MetricsError> {
                store.register(task_id, "a.csv", 0)?;
                store.start(task_id)?;
                for sequence in 1..=100 {
                    store.record(task_id, delta(sequence, 2, 1, 1))?;
                }
                store.finish(task_id, TaskOutcome::Completed)
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked")?;
    }

    for task_id in task_ids {
        let snapshot = store.get(task_id)?;
        assert_eq!((snapshot.rows_seen, snapshot.rows_inserted, snapshot.rows_rejected), (200, 100, 100));
    }

    Ok(())
}
