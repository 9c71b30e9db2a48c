//! Inline-synchronous queue backend.
//!
//! Used for testing and local development: `push` executes the handler
//! immediately in the calling task and returns a synthetic id. Nothing is
//! ever stored, so `pop` is always empty and the failed-job surface is a
//! no-op. Handler failures propagate directly to the caller of `push`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{QueueBackend, QueueError};
use crate::core::payload::JobPayload;
use crate::core::record::{FailedJob, JobRecord};
use crate::core::types::JobId;
use crate::registry::HandlerRegistry;

/// Backend that runs every pushed job inline.
pub struct SyncQueue {
    registry: Arc<HandlerRegistry>,
}

impl SyncQueue {
    /// Create a backend resolving handlers from the given registry.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl QueueBackend for SyncQueue {
    async fn push(
        &self,
        payload: &JobPayload,
        _queue: &str,
        _delay: Duration,
    ) -> Result<JobId, QueueError> {
        let handler = self
            .registry
            .resolve(&payload.class)
            .map_err(|e| QueueError::Handler(e.to_string()))?;

        handler
            .execute(&payload.args)
            .await
            .map_err(|e| QueueError::Handler(e.to_string()))?;

        Ok(JobId::new())
    }

    async fn pop(&self, _queue: &str) -> Result<Option<JobRecord>, QueueError> {
        Ok(None)
    }

    async fn release(&self, _record: &JobRecord, _delay: Duration) -> Result<(), QueueError> {
        Ok(())
    }

    async fn delete(&self, _record: &JobRecord) -> Result<(), QueueError> {
        Ok(())
    }

    async fn mark_failed(&self, _record: &JobRecord, _exception: &str) -> Result<(), QueueError> {
        Ok(())
    }

    async fn size(&self, _queue: &str) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn clear(&self, _queue: &str) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError> {
        Ok(Vec::new())
    }

    async fn retry_failed_job(&self, _id: &JobId) -> Result<bool, QueueError> {
        Ok(false)
    }

    async fn forget_failed_job(&self, _id: &JobId) -> Result<bool, QueueError> {
        Ok(false)
    }

    async fn clear_failed_jobs(&self) -> Result<u64, QueueError> {
        Ok(0)
    }
}
