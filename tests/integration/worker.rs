//! Worker-loop scenarios: queue priority, cooperative shutdown, and
//! multi-worker draining of a shared backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};

use tempo::testing::{RecordingEvents, RecordingHandler};
use tempo::{
    DatabaseQueue, EventBus, Handler, HandlerError, HandlerRegistry, JobArgs, QueueManager,
    Worker,
};

/// Handler that appends a label to a shared log on every invocation.
#[derive(Clone)]
struct LabelingHandler {
    name: String,
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Handler for LabelingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _args: &JobArgs) -> Result<Value, HandlerError> {
        self.log.lock().await.push(self.label.clone());
        Ok(json!("ok"))
    }
}

/// Handler that signals when it starts and then blocks for a while.
#[derive(Clone)]
struct SlowHandler {
    started: Arc<Notify>,
    block: Duration,
}

#[async_trait]
impl Handler for SlowHandler {
    fn name(&self) -> &str {
        "jobs.Slow"
    }

    async fn execute(&self, _args: &JobArgs) -> Result<Value, HandlerError> {
        self.started.notify_one();
        tokio::time::sleep(self.block).await;
        Ok(json!("ok"))
    }
}

async fn database_manager(registry: HandlerRegistry, events: Arc<EventBus>) -> Arc<QueueManager> {
    let backend = Arc::new(
        DatabaseQueue::in_memory(Duration::from_secs(90))
            .await
            .unwrap(),
    );
    Arc::new(QueueManager::new(backend, Arc::new(registry), events))
}

#[tokio::test]
async fn test_high_priority_queue_is_drained_before_low() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    for (class, label) in [("jobs.High", "high"), ("jobs.Low", "low")] {
        let handler = LabelingHandler {
            name: class.to_string(),
            label: label.to_string(),
            log: log.clone(),
        };
        registry.register(class, move || handler.clone());
    }
    let manager = database_manager(registry, Arc::new(EventBus::new())).await;

    // Low-priority work is pushed first; the worker must still take the
    // high-priority queue first.
    for _ in 0..2 {
        manager
            .dispatch("jobs.Low", JobArgs::new(), Some("low"), Duration::ZERO)
            .await
            .unwrap();
    }
    for _ in 0..2 {
        manager
            .dispatch("jobs.High", JobArgs::new(), Some("high"), Duration::ZERO)
            .await
            .unwrap();
    }

    let worker = Worker::new(manager)
        .with_queues(vec!["high".into(), "low".into()])
        .with_stop_when_empty(true);
    let processed = worker.run().await;

    assert_eq!(processed, 4);
    assert_eq!(
        *log.lock().await,
        vec!["high", "high", "low", "low"]
    );
}

#[tokio::test]
async fn test_stop_lets_the_in_flight_job_finish_and_processes_nothing_more() {
    let started = Arc::new(Notify::new());
    let slow = SlowHandler {
        started: started.clone(),
        block: Duration::from_millis(300),
    };
    let mut registry = HandlerRegistry::new();
    {
        let slow = slow.clone();
        registry.register("jobs.Slow", move || slow.clone());
    }

    let events = Arc::new(EventBus::new());
    let recording = RecordingEvents::new();
    events.register(recording.clone()).await;

    let manager = database_manager(registry, events).await;
    for _ in 0..3 {
        manager
            .dispatch("jobs.Slow", JobArgs::new(), None, Duration::ZERO)
            .await
            .unwrap();
    }

    let worker = Worker::new(manager.clone());
    let handle = worker.handle();
    let task = tokio::spawn(worker.run());

    // Stop while the first job is executing.
    started.notified().await;
    handle.stop();

    let processed = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("worker did not stop")
        .unwrap();

    // The in-flight job completed; nothing further was reserved.
    assert_eq!(processed, 1);
    assert_eq!(manager.size(None).await.unwrap(), 2);
    assert_eq!(recording.processed_count().await, 1);
}

#[tokio::test]
async fn test_worker_emits_started_and_stopped_events() {
    let handler = RecordingHandler::new("jobs.Ok");
    let mut registry = HandlerRegistry::new();
    {
        let handler = handler.clone();
        registry.register("jobs.Ok", move || handler.clone());
    }

    let events = Arc::new(EventBus::new());
    let recording = RecordingEvents::new();
    events.register(recording.clone()).await;

    let manager = database_manager(registry, events).await;
    manager
        .dispatch("jobs.Ok", JobArgs::new(), None, Duration::ZERO)
        .await
        .unwrap();

    let worker = Worker::new(manager).with_stop_when_empty(true);
    worker.run().await;

    assert_eq!(recording.worker_started_count().await, 1);
    assert_eq!(recording.worker_stopped_count().await, 1);
}

#[tokio::test]
async fn test_two_workers_drain_one_backend_without_double_processing() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(
        DatabaseQueue::new(dir.path().join("queue.db"), Duration::from_secs(90))
            .await
            .unwrap(),
    );

    let handler = RecordingHandler::new("jobs.Ok");
    let mut registry = HandlerRegistry::new();
    {
        let handler = handler.clone();
        registry.register("jobs.Ok", move || handler.clone());
    }
    let registry = Arc::new(registry);

    let events = Arc::new(EventBus::new());
    let recording = RecordingEvents::new();
    events.register(recording.clone()).await;

    let manager = Arc::new(QueueManager::new(backend, registry, events));

    const RECORDS: u64 = 100;
    for i in 0..RECORDS {
        manager
            .dispatch(
                "jobs.Ok",
                crate::common::args_of(json!({"i": i})),
                None,
                Duration::ZERO,
            )
            .await
            .unwrap();
    }

    let worker_a = Worker::new(manager.clone()).with_stop_when_empty(true);
    let worker_b = Worker::new(manager.clone()).with_stop_when_empty(true);

    let (a, b) = tokio::join!(
        tokio::spawn(worker_a.run()),
        tokio::spawn(worker_b.run())
    );
    let total = a.unwrap() + b.unwrap();

    // Every record was processed exactly once across the pair: the totals
    // add up and the handler saw no duplicates.
    assert_eq!(total, RECORDS);
    assert_eq!(handler.invocation_count().await, RECORDS as usize);
    assert_eq!(recording.processed_count().await, RECORDS as usize);
    assert_eq!(manager.size(None).await.unwrap(), 0);
}
