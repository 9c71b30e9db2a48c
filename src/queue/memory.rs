//! In-memory queue backend.
//!
//! Thread-safe storage using RwLock for concurrent access; nothing is
//! persisted across restarts. Useful for embedding the engine in tests and
//! for exercising the reservation protocol without touching disk.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::{QueueBackend, QueueError};
use crate::core::payload::JobPayload;
use crate::core::record::{now_unix, FailedJob, JobRecord};
use crate::core::types::JobId;

/// A stored record plus its insertion sequence, used to break ties between
/// records with equal availability.
struct Entry {
    seq: u64,
    record: JobRecord,
}

/// A failed record plus its insertion sequence.
struct FailedEntry {
    seq: u64,
    job: FailedJob,
}

/// In-memory queue backend.
pub struct MemoryQueue {
    retry_after: Duration,
    jobs: RwLock<HashMap<JobId, Entry>>,
    failed: RwLock<HashMap<JobId, FailedEntry>>,
    next_seq: AtomicU64,
}

impl MemoryQueue {
    /// Create an empty backend with the given visibility timeout.
    pub fn new(retry_after: Duration) -> Self {
        Self {
            retry_after,
            jobs: RwLock::new(HashMap::new()),
            failed: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn bump_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(
        &self,
        payload: &JobPayload,
        queue: &str,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let record = JobRecord::fresh(payload.clone(), queue, delay);
        let id = record.id.clone();

        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        jobs.insert(
            id.clone(),
            Entry {
                seq: self.bump_seq(),
                record,
            },
        );
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let now = now_unix();
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;

        // Visibility sweep: expired reservations return to pending.
        for entry in jobs.values_mut() {
            if entry.record.queue == queue
                && entry.record.is_reservation_expired(self.retry_after, now)
            {
                entry.record.mark_released(Duration::ZERO, now);
            }
        }

        // Oldest available record; insertion order breaks ties.
        let candidate = jobs
            .values()
            .filter(|e| e.record.queue == queue && e.record.is_available(now))
            .min_by_key(|e| (e.record.available_at, e.record.created_at, e.seq))
            .map(|e| e.record.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };

        let entry = jobs.get_mut(&id).ok_or(QueueError::LockPoisoned)?;
        entry.record.mark_reserved(now);
        Ok(Some(entry.record.clone()))
    }

    async fn release(&self, record: &JobRecord, delay: Duration) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        if let Some(entry) = jobs.get_mut(&record.id) {
            entry.record.mark_released(delay, now_unix());
        }
        Ok(())
    }

    async fn delete(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        jobs.remove(&record.id);
        Ok(())
    }

    async fn mark_failed(&self, record: &JobRecord, exception: &str) -> Result<(), QueueError> {
        let failed_job = FailedJob::from_record(record, exception, now_unix());

        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        let mut failed = self.failed.write().map_err(|_| QueueError::LockPoisoned)?;
        failed.insert(
            failed_job.id.clone(),
            FailedEntry {
                seq: self.bump_seq(),
                job: failed_job,
            },
        );
        jobs.remove(&record.id);
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let jobs = self.jobs.read().map_err(|_| QueueError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|e| e.record.queue == queue && !e.record.is_reserved())
            .count() as u64)
    }

    async fn clear(&self, queue: &str) -> Result<u64, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        let before = jobs.len();
        jobs.retain(|_, e| e.record.queue != queue);
        Ok((before - jobs.len()) as u64)
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError> {
        let failed = self.failed.read().map_err(|_| QueueError::LockPoisoned)?;
        let mut entries: Vec<_> = failed.values().collect();
        entries.sort_by(|a, b| (b.job.failed_at, b.seq).cmp(&(a.job.failed_at, a.seq)));
        Ok(entries.iter().map(|e| e.job.clone()).collect())
    }

    async fn retry_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        // Never hold both locks at once; mark_failed takes them in the
        // opposite order.
        let entry = {
            let mut failed = self.failed.write().map_err(|_| QueueError::LockPoisoned)?;
            match failed.remove(id) {
                Some(entry) => entry,
                None => return Ok(false),
            }
        };

        let record = entry.job.to_fresh_record();
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        jobs.insert(
            record.id.clone(),
            Entry {
                seq: self.bump_seq(),
                record,
            },
        );
        Ok(true)
    }

    async fn forget_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        let mut failed = self.failed.write().map_err(|_| QueueError::LockPoisoned)?;
        Ok(failed.remove(id).is_some())
    }

    async fn clear_failed_jobs(&self) -> Result<u64, QueueError> {
        let mut failed = self.failed.write().map_err(|_| QueueError::LockPoisoned)?;
        let removed = failed.len() as u64;
        failed.clear();
        Ok(removed)
    }
}
