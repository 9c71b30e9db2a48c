//! Manager-level scenarios: driver selection, the sync driver's inline
//! execution, and the full retry state machine with events.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tempo::testing::{FailingHandler, RecordingEvents, RecordingHandler};
use tempo::{
    AppConfig, DatabaseAdapter, EventBus, Event, HandlerRegistry, JobArgs, QueueDriver,
    QueueManager, YamlLoader,
};

use crate::common::args_of;

fn registry_with_recording(handler: &RecordingHandler) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    let cloned = handler.clone();
    registry.register(handler.name_string(), move || cloned.clone());
    Arc::new(registry)
}

#[tokio::test]
async fn test_sync_driver_executes_dispatches_inline() {
    let handler = RecordingHandler::new("jobs.Inline").with_result(json!("ok"));
    let registry = registry_with_recording(&handler);

    let mut config = AppConfig::default();
    config.queue.driver = QueueDriver::Sync;

    let manager = QueueManager::from_config(&config, registry, Arc::new(EventBus::new()))
        .await
        .unwrap();

    // dispatch_now returns the handler's result directly.
    let result = manager
        .dispatch_now("jobs.Inline", &args_of(json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(result, json!("ok"));

    // dispatch executes inline through the sync backend.
    manager
        .dispatch("jobs.Inline", args_of(json!({"x": 1})), None, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(handler.invocation_count().await, 2);
    for invocation in handler.invocations().await {
        assert_eq!(invocation, args_of(json!({"x": 1})));
    }
    assert_eq!(manager.size(Some("default")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sync_driver_propagates_failures_to_the_dispatcher() {
    let failing = FailingHandler::new("jobs.Broken", u32::MAX);
    let mut registry = HandlerRegistry::new();
    {
        let failing = failing.clone();
        registry.register("jobs.Broken", move || failing.clone());
    }

    let mut config = AppConfig::default();
    config.queue.driver = QueueDriver::Sync;

    let manager =
        QueueManager::from_config(&config, Arc::new(registry), Arc::new(EventBus::new()))
            .await
            .unwrap();

    let result = manager
        .dispatch("jobs.Broken", JobArgs::new(), None, Duration::ZERO)
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_always_failing_job_walks_the_backoff_ladder_to_failed_storage() {
    let dir = TempDir::new().unwrap();
    let failing = FailingHandler::new("jobs.Broken", u32::MAX);
    let mut registry = HandlerRegistry::new();
    {
        let failing = failing.clone();
        registry.register("jobs.Broken", move || failing.clone());
    }

    let mut config = AppConfig::default();
    config.queue.driver = QueueDriver::Database;
    config.queue.max_attempts = 3;
    config.queue.backoff = 1;
    config.queue.retry_after = 90;
    config.database.name = dir
        .path()
        .join("queue.db")
        .to_string_lossy()
        .into_owned();

    let events = Arc::new(EventBus::new());
    let recording = RecordingEvents::new();
    events.register(recording.clone()).await;

    let manager = QueueManager::from_config(&config, Arc::new(registry), events)
        .await
        .unwrap();

    manager
        .dispatch("jobs.Broken", JobArgs::new(), None, Duration::ZERO)
        .await
        .unwrap();

    // Attempt 1 fails and releases with a 1s delay.
    assert!(manager.process_next_job(None).await);
    assert!(!manager.process_next_job(None).await);

    // Attempt 2 becomes available after the base delay, fails, and
    // releases with a doubled delay.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(manager.process_next_job(None).await);
    assert!(!manager.process_next_job(None).await);

    // Attempt 3 is terminal: the record moves to failed storage.
    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert!(manager.process_next_job(None).await);
    assert!(!manager.process_next_job(None).await);

    assert_eq!(failing.call_count().await, 3);
    assert_eq!(manager.size(None).await.unwrap(), 0);

    let failed = manager.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);

    assert_eq!(recording.failed_count().await, 3);
    assert_eq!(recording.max_attempts_count().await, 1);

    // The terminal event carries the configured bound.
    let events = recording.events().await;
    let terminal = events
        .iter()
        .find_map(|e| match e {
            Event::JobMaxAttemptsReached { max_attempts, .. } => Some(*max_attempts),
            _ => None,
        })
        .unwrap();
    assert_eq!(terminal, 3);
}

#[tokio::test]
async fn test_unsupported_database_adapter_is_fatal_at_construction() {
    let mut config = AppConfig::default();
    config.queue.driver = QueueDriver::Database;
    config.database.adapter = DatabaseAdapter::Pgsql;

    let result = QueueManager::from_config(
        &config,
        Arc::new(HandlerRegistry::new()),
        Arc::new(EventBus::new()),
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_file_driver_from_config() {
    let dir = TempDir::new().unwrap();
    let handler = RecordingHandler::new("jobs.File");
    let registry = registry_with_recording(&handler);

    let yaml = format!(
        "queue:\n  driver: file\n  file_path: {}\n",
        dir.path().display()
    );
    let config = YamlLoader::parse_app_config(&yaml).unwrap();

    let manager = QueueManager::from_config(&config, registry, Arc::new(EventBus::new()))
        .await
        .unwrap();

    manager
        .dispatch("jobs.File", JobArgs::new(), None, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(manager.size(None).await.unwrap(), 1);
    assert!(manager.process_next_job(None).await);
    assert_eq!(handler.invocation_count().await, 1);
}
