//! Reservation-protocol tests against the relational backend.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tempo::{DatabaseQueue, JobPayload, QueueBackend};

use crate::common::args_of;

fn payload(class: &str) -> JobPayload {
    JobPayload::new(class, args_of(json!({"n": 1})))
}

/// A file-backed database shared by several connections, unlike the
/// single-connection in-memory database.
async fn shared_backend(dir: &TempDir, retry_after: u64) -> DatabaseQueue {
    DatabaseQueue::new(dir.path().join("queue.db"), Duration::from_secs(retry_after))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_pops_consume_each_record_exactly_once() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(shared_backend(&dir, 90).await);

    const RECORDS: usize = 100;
    for _ in 0..RECORDS {
        backend
            .push(&payload("jobs.A"), "default", Duration::ZERO)
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(record) = backend.pop("default").await.unwrap() {
                ids.push(record.id.clone());
                backend.delete(&record).await.unwrap();
            }
            ids
        }));
    }

    let mut per_task: Vec<Vec<_>> = Vec::new();
    for task in tasks {
        per_task.push(task.await.unwrap());
    }

    let all: Vec<_> = per_task.iter().flatten().cloned().collect();
    let unique: HashSet<_> = all.iter().cloned().collect();

    // Total pops equal the records consumed, and no record was handed to
    // two poppers.
    assert_eq!(all.len(), RECORDS);
    assert_eq!(unique.len(), RECORDS);
    assert_eq!(backend.size("default").await.unwrap(), 0);
}

#[tokio::test]
async fn test_attempts_increment_once_per_pop() {
    let dir = TempDir::new().unwrap();
    let backend = shared_backend(&dir, 90).await;

    backend
        .push(&payload("jobs.A"), "default", Duration::ZERO)
        .await
        .unwrap();

    let mut observed = Vec::new();
    for _ in 0..3 {
        let record = backend.pop("default").await.unwrap().unwrap();
        observed.push(record.attempts);
        backend.release(&record, Duration::ZERO).await.unwrap();
    }

    assert_eq!(observed, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_delayed_push_becomes_visible_after_the_delay() {
    let dir = TempDir::new().unwrap();
    let backend = shared_backend(&dir, 90).await;

    let id = backend
        .push(&payload("jobs.Later"), "default", Duration::from_secs(1))
        .await
        .unwrap();

    assert!(backend.pop("default").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let record = backend.pop("default").await.unwrap().unwrap();
    assert_eq!(record.id, id);
}

#[tokio::test]
async fn test_abandoned_reservation_is_reclaimed_with_attempts_intact() {
    let dir = TempDir::new().unwrap();
    let backend = shared_backend(&dir, 1).await;

    let id = backend
        .push(&payload("jobs.A"), "default", Duration::ZERO)
        .await
        .unwrap();

    // First worker reserves and then dies without deleting or releasing.
    let record = backend.pop("default").await.unwrap().unwrap();
    assert_eq!(record.attempts, 1);
    drop(record);

    // Within the visibility window the record stays invisible.
    assert!(backend.pop("default").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // A fresh pop reclaims it; the pre-crash attempt still counts.
    let reclaimed = backend.pop("default").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test]
async fn test_payload_survives_the_backend_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let backend = shared_backend(&dir, 90).await;

    let original = JobPayload::new(
        "jobs.Report",
        args_of(json!({
            "zeta": [1, 2, 3],
            "alpha": {"nested": true, "count": 7},
            "text": "hello"
        })),
    );

    backend.push(&original, "default", Duration::ZERO).await.unwrap();
    let record = backend.pop("default").await.unwrap().unwrap();

    assert_eq!(record.payload, original);
    assert_eq!(
        record.payload.encode().unwrap(),
        original.encode().unwrap()
    );
}
