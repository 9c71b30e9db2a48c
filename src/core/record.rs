//! Queued job records and failed-job records.
//!
//! A [`JobRecord`] is one unit of work in a queue: immutable identity and
//! payload, plus the mutable reservation/attempt metadata the backends
//! maintain. A [`FailedJob`] is the same identity and payload moved to
//! failed storage after the record exhausted its attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::payload::JobPayload;
use crate::core::types::JobId;

/// Current unix time in whole seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique record identifier; never reused.
    pub id: JobId,
    /// Queue the record was pushed to; immutable.
    pub queue: String,
    /// Handler name plus argument bag; immutable after push.
    pub payload: JobPayload,
    /// Number of times the record has been reserved.
    pub attempts: u32,
    /// Set while a worker holds the record; unix seconds.
    pub reserved_at: Option<i64>,
    /// When the record becomes eligible for reservation; unix seconds.
    pub available_at: i64,
    /// When the record was pushed; unix seconds.
    pub created_at: i64,
}

impl JobRecord {
    /// Create a fresh record that becomes available after `delay`.
    pub fn fresh(payload: JobPayload, queue: impl Into<String>, delay: Duration) -> Self {
        let now = now_unix();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            attempts: 0,
            reserved_at: None,
            available_at: now + delay.as_secs() as i64,
            created_at: now,
        }
    }

    /// Rebuild a record from stored fields.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: JobId,
        queue: impl Into<String>,
        payload: JobPayload,
        attempts: u32,
        reserved_at: Option<i64>,
        available_at: i64,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            payload,
            attempts,
            reserved_at,
            available_at,
            created_at,
        }
    }

    /// Whether the record is currently reserved.
    pub fn is_reserved(&self) -> bool {
        self.reserved_at.is_some()
    }

    /// Whether an unreserved record is eligible for reservation at `now`.
    pub fn is_available(&self, now: i64) -> bool {
        self.reserved_at.is_none() && self.available_at <= now
    }

    /// Whether a reserved record's visibility timeout has expired at `now`.
    pub fn is_reservation_expired(&self, retry_after: Duration, now: i64) -> bool {
        match self.reserved_at {
            Some(reserved) => reserved + retry_after.as_secs() as i64 <= now,
            None => false,
        }
    }

    /// Reserve the record. Increments `attempts`; this is the only place
    /// the counter moves.
    pub fn mark_reserved(&mut self, now: i64) {
        self.reserved_at = Some(now);
        self.attempts += 1;
    }

    /// Return the record to the pending state, eligible again at
    /// `now + delay`. Does not change `attempts`.
    pub fn mark_released(&mut self, delay: Duration, now: i64) {
        self.reserved_at = None;
        self.available_at = now + delay.as_secs() as i64;
    }
}

/// A record moved to failed storage, no longer consumed by workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// The failed record's identifier (same as the live record's).
    pub id: JobId,
    /// Queue the record belonged to.
    pub queue: String,
    /// Handler name plus argument bag.
    pub payload: JobPayload,
    /// Formatted error: kind and message of the final failure.
    pub exception: String,
    /// When the record was moved to failed storage; unix seconds.
    pub failed_at: i64,
}

impl FailedJob {
    /// Build a failed record from a live record and its final error.
    pub fn from_record(record: &JobRecord, exception: impl Into<String>, now: i64) -> Self {
        Self {
            id: record.id.clone(),
            queue: record.queue.clone(),
            payload: record.payload.clone(),
            exception: exception.into(),
            failed_at: now,
        }
    }

    /// Produce a fresh live record for retrying this failed job.
    ///
    /// The new record has a new id, zero attempts, and is immediately
    /// available.
    pub fn to_fresh_record(&self) -> JobRecord {
        JobRecord::fresh(self.payload.clone(), self.queue.clone(), Duration::ZERO)
    }
}
