//! End-to-end tests for the filesystem backend behind the manager.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tempo::{EventBus, FileQueue, HandlerRegistry, JobArgs, QueueManager, Worker};
use tempo::testing::{FailingHandler, RecordingHandler};

use crate::common::args_of;

fn manager_over(
    backend: FileQueue,
    registry: HandlerRegistry,
) -> Arc<QueueManager> {
    Arc::new(QueueManager::new(
        Arc::new(backend),
        Arc::new(registry),
        Arc::new(EventBus::new()),
    ))
}

#[tokio::test]
async fn test_worker_drains_a_file_queue() {
    let dir = TempDir::new().unwrap();
    let backend = FileQueue::new(dir.path(), Duration::from_secs(90)).unwrap();

    let handler = RecordingHandler::new("jobs.File");
    let mut registry = HandlerRegistry::new();
    {
        let handler = handler.clone();
        registry.register("jobs.File", move || handler.clone());
    }
    let manager = manager_over(backend, registry);

    for i in 0..5 {
        manager
            .dispatch("jobs.File", args_of(json!({"i": i})), None, Duration::ZERO)
            .await
            .unwrap();
    }

    let worker = Worker::new(manager.clone()).with_stop_when_empty(true);
    let processed = worker.run().await;

    assert_eq!(processed, 5);
    assert_eq!(handler.invocation_count().await, 5);
    assert_eq!(manager.size(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_records_land_on_disk_and_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let backend = FileQueue::new(dir.path(), Duration::from_secs(90)).unwrap();

    let handler = FailingHandler::new("jobs.Broken", u32::MAX);
    let mut registry = HandlerRegistry::new();
    {
        let handler = handler.clone();
        registry.register("jobs.Broken", move || handler.clone());
    }
    let manager = Arc::new(
        QueueManager::new(
            Arc::new(backend),
            Arc::new(registry),
            Arc::new(EventBus::new()),
        )
        .with_max_attempts(2),
    );

    manager
        .dispatch("jobs.Broken", JobArgs::new(), None, Duration::ZERO)
        .await
        .unwrap();

    let worker = Worker::new(manager.clone()).with_stop_when_empty(true);
    worker.run().await;

    let failed = manager.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].exception.contains("HandlerFailed"));
    assert_eq!(handler.call_count().await, 2);

    // The failed record file lives under failed/ and is requeued on retry.
    assert!(manager.retry_failed_job(&failed[0].id).await.unwrap());
    assert!(manager.failed_jobs().await.unwrap().is_empty());
    assert_eq!(manager.size(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_two_workers_share_a_file_queue_without_overlap() {
    let dir = TempDir::new().unwrap();

    let handler = RecordingHandler::new("jobs.File");
    let mut registry = HandlerRegistry::new();
    {
        let handler = handler.clone();
        registry.register("jobs.File", move || handler.clone());
    }
    let registry = Arc::new(registry);
    let events = Arc::new(EventBus::new());

    // Two managers over the same directory, as two processes would be.
    let make_manager = |registry: Arc<HandlerRegistry>, events: Arc<EventBus>| {
        let backend = FileQueue::new(dir.path(), Duration::from_secs(90)).unwrap();
        Arc::new(QueueManager::new(Arc::new(backend), registry, events))
    };
    let manager_a = make_manager(registry.clone(), events.clone());
    let manager_b = make_manager(registry, events);

    const RECORDS: u64 = 30;
    for _ in 0..RECORDS {
        manager_a
            .dispatch("jobs.File", JobArgs::new(), None, Duration::ZERO)
            .await
            .unwrap();
    }

    let worker_a = Worker::new(manager_a.clone()).with_stop_when_empty(true);
    let worker_b = Worker::new(manager_b).with_stop_when_empty(true);

    let (a, b) = tokio::join!(
        tokio::spawn(worker_a.run()),
        tokio::spawn(worker_b.run())
    );
    let total = a.unwrap() + b.unwrap();

    // Every record processed exactly once across both workers.
    assert_eq!(total, RECORDS);
    assert_eq!(handler.invocation_count().await, RECORDS as usize);
    assert_eq!(manager_a.size(None).await.unwrap(), 0);
}
