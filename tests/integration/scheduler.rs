//! Scheduler scenarios: due-ness at fixed instants, the once-per-minute
//! guard, and the schedule-to-queue-to-worker path.

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use tempo::testing::{RecordingEvents, RecordingHandler};
use tempo::{
    DatabaseQueue, EventBus, HandlerRegistry, JobArgs, QueueManager, Scheduler, SyncQueue,
    Worker, YamlLoader,
};

use crate::common::{args_of, eventually};

fn registry_with(handler: &RecordingHandler) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    let cloned = handler.clone();
    registry.register(handler.name_string(), move || cloned.clone());
    Arc::new(registry)
}

fn sync_manager(handler: &RecordingHandler, events: Arc<EventBus>) -> Arc<QueueManager> {
    let registry = registry_with(handler);
    Arc::new(QueueManager::new(
        Arc::new(SyncQueue::new(registry.clone())),
        registry,
        events,
    ))
}

#[tokio::test]
async fn test_every_minute_entry_fires_once_per_minute() {
    let handler = RecordingHandler::new("H");
    let events = Arc::new(EventBus::new());
    let recording = RecordingEvents::new();
    events.register(recording.clone()).await;

    let mut scheduler = Scheduler::new(sync_manager(&handler, events));
    scheduler
        .add("A", "* * * * *", "H", JobArgs::new(), None)
        .unwrap();

    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 45).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 5).unwrap();

    assert_eq!(scheduler.poll_at(t0).await, 1);
    assert_eq!(scheduler.poll_at(t1).await, 0);
    assert_eq!(scheduler.poll_at(t2).await, 1);

    assert_eq!(handler.invocation_count().await, 2);
    assert_eq!(recording.triggered_count().await, 2);
}

#[tokio::test]
async fn test_scheduled_entry_args_reach_the_handler() {
    let handler = RecordingHandler::new("H");
    let mut scheduler = Scheduler::new(sync_manager(&handler, Arc::new(EventBus::new())));
    scheduler
        .add(
            "report",
            "* * * * *",
            "H",
            args_of(json!({"recipients": "ops", "limit": 10})),
            None,
        )
        .unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();
    assert_eq!(scheduler.poll_at(now).await, 1);

    let invocations = handler.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0], args_of(json!({"recipients": "ops", "limit": 10})));
}

#[tokio::test]
async fn test_schedule_file_drives_dispatch_through_queue_to_worker() {
    let handler = RecordingHandler::new("jobs.Nightly");
    let registry = registry_with(&handler);
    let backend = Arc::new(
        DatabaseQueue::in_memory(Duration::from_secs(90))
            .await
            .unwrap(),
    );
    let manager = Arc::new(QueueManager::new(
        backend,
        registry,
        Arc::new(EventBus::new()),
    ));

    let file = YamlLoader::parse_schedule(
        r#"
schedule:
  nightly:
    class: jobs.Nightly
    cron: "0 2 * * *"
    args:
      source: schedule
    queue: reports
"#,
    )
    .unwrap();

    let mut scheduler = Scheduler::new(manager.clone());
    assert_eq!(scheduler.load(&file), 1);

    // Not due outside 02:00.
    let mid_day = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    assert_eq!(scheduler.poll_at(mid_day).await, 0);

    // Due at 02:00; the job lands on the queue, nothing runs inline.
    let two_am = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 15).unwrap();
    assert_eq!(scheduler.poll_at(two_am).await, 1);
    assert_eq!(handler.invocation_count().await, 0);
    assert_eq!(manager.size(Some("reports")).await.unwrap(), 1);

    // A worker on that queue picks it up.
    let worker = Worker::new(manager.clone())
        .with_queues(vec!["reports".into()])
        .with_stop_when_empty(true);
    let task = tokio::spawn(worker.run());

    eventually(Duration::from_secs(5), "scheduled job to be processed", || {
        let handler = handler.clone();
        async move { handler.invocation_count().await == 1 }
    })
    .await;

    task.await.unwrap();
    assert_eq!(
        handler.invocations().await[0],
        args_of(json!({"source": "schedule"}))
    );
    assert_eq!(manager.size(Some("reports")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_entries_in_schedule_file_are_skipped() {
    let handler = RecordingHandler::new("H");
    let mut scheduler = Scheduler::new(sync_manager(&handler, Arc::new(EventBus::new())));

    let file = YamlLoader::parse_schedule(
        r#"
schedule:
  good:
    class: H
    cron: "* * * * *"
  bad-cron:
    class: H
    cron: "not a cron"
  bad-timezone:
    class: H
    cron: "* * * * *"
    timezone: Nowhere/Invalid
"#,
    )
    .unwrap();

    assert_eq!(scheduler.load(&file), 1);
    assert_eq!(scheduler.entries().len(), 1);
    assert_eq!(scheduler.entries()[0].name(), "good");
}

#[tokio::test]
async fn test_debug_mode_runs_a_single_tick() {
    let handler = RecordingHandler::new("H");
    let mut scheduler =
        Scheduler::new(sync_manager(&handler, Arc::new(EventBus::new())))
            .with_interval(Duration::from_secs(3600))
            .with_debug(true);
    scheduler
        .add("A", "* * * * *", "H", JobArgs::new(), None)
        .unwrap();

    // Completes without waiting out the interval.
    tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("debug run should return after one tick");

    assert_eq!(handler.invocation_count().await, 1);
}

#[tokio::test]
async fn test_stop_interrupts_the_polling_loop() {
    let handler = RecordingHandler::new("H");
    let scheduler = Scheduler::new(sync_manager(&handler, Arc::new(EventBus::new())))
        .with_interval(Duration::from_secs(3600));

    let handle = scheduler.handle();
    let task = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
