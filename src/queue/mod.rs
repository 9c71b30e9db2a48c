//! Durable queue storage for job records.
//!
//! This module provides a trait-based queue abstraction with pluggable
//! backends: relational ([`DatabaseQueue`]), local-filesystem
//! ([`FileQueue`]), inline-synchronous ([`SyncQueue`]), and in-process
//! ([`MemoryQueue`], for embedding and tests). The backend is the only
//! shared mutable resource in the engine; its atomic `pop` is what makes
//! concurrent workers safe.

mod database;
mod file;
mod manager;
mod memory;
mod sync;

pub use database::DatabaseQueue;
pub use file::FileQueue;
pub use manager::QueueManager;
pub use memory::MemoryQueue;
pub use sync::SyncQueue;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::payload::{JobPayload, PayloadError};
use crate::core::record::{FailedJob, JobRecord};
use crate::core::types::JobId;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Database failure.
    #[error("database error: {0}")]
    Database(String),

    /// In-process storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A handler failure surfaced through the synchronous backend.
    #[error("handler error: {0}")]
    Handler(String),

    /// Generic queue error.
    #[error("queue error: {0}")]
    Other(String),
}

impl From<PayloadError> for QueueError {
    fn from(e: PayloadError) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

/// Durable storage with atomic reserve/release/delete/fail operations.
///
/// Implementations must guarantee that no two concurrent `pop` calls
/// return the same record, and that a record reserved for longer than the
/// backend's visibility timeout is returned to the pending state with its
/// attempt count intact.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create a new pending record that becomes available after `delay`.
    /// Durable before returning. Concurrent pushes with identical content
    /// produce distinct ids.
    async fn push(
        &self,
        payload: &JobPayload,
        queue: &str,
        delay: Duration,
    ) -> Result<JobId, QueueError>;

    /// Atomically reserve the oldest available record in `queue`,
    /// incrementing its attempt count. Returns `None` when no record is
    /// eligible. Sweeps expired reservations before selecting.
    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Return a reserved record to the pending state, eligible again after
    /// `delay`. Does not change the attempt count. No-op if the record no
    /// longer exists.
    async fn release(&self, record: &JobRecord, delay: Duration) -> Result<(), QueueError>;

    /// Remove a record permanently. No-op if absent.
    async fn delete(&self, record: &JobRecord) -> Result<(), QueueError>;

    /// Move a record to failed storage and remove the live record. A crash
    /// in between leaves either both or only the live record, never only
    /// the failed one.
    async fn mark_failed(&self, record: &JobRecord, exception: &str) -> Result<(), QueueError>;

    /// Count pending (unreserved) records in `queue`.
    async fn size(&self, queue: &str) -> Result<u64, QueueError>;

    /// Delete all records in `queue`, pending or reserved. Returns the
    /// number removed.
    async fn clear(&self, queue: &str) -> Result<u64, QueueError>;

    /// Failed records, newest first.
    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError>;

    /// Requeue a failed record as a fresh pending record (new id, zero
    /// attempts) and delete the failed record. Returns `false` when the id
    /// is unknown.
    async fn retry_failed_job(&self, id: &JobId) -> Result<bool, QueueError>;

    /// Delete one failed record. Returns `false` when the id is unknown.
    async fn forget_failed_job(&self, id: &JobId) -> Result<bool, QueueError>;

    /// Delete all failed records. Returns the number removed.
    async fn clear_failed_jobs(&self) -> Result<u64, QueueError>;
}
