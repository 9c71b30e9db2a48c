//! Queue manager: the facade over a backend.
//!
//! The manager owns dispatching, the worker's single-step
//! `process_next_job` primitive, and the retry policy that decides between
//! re-enqueueing a failed record with backoff and moving it to failed
//! storage. Observability events are emitted at each well-defined point;
//! event delivery never prevents record cleanup.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{DatabaseQueue, FileQueue, QueueBackend, QueueError, SyncQueue};
use crate::config::{AppConfig, QueueDriver};
use crate::core::backoff::BackoffPolicy;
use crate::core::payload::{JobArgs, JobPayload};
use crate::core::record::{FailedJob, JobRecord};
use crate::core::types::JobId;
use crate::events::{Event, EventBus};
use crate::registry::{HandlerRegistry, RegistryError};

/// Facade over a queue backend.
pub struct QueueManager {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    events: Arc<EventBus>,
    default_queue: String,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl QueueManager {
    /// Create a manager over an explicit backend with default settings
    /// (queue `default`, 3 attempts, no backoff).
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            backend,
            registry,
            events,
            default_queue: "default".to_string(),
            max_attempts: 3,
            backoff: BackoffPolicy::none(),
        }
    }

    /// Build the manager and its backend from application configuration.
    ///
    /// Fails when the configured driver cannot be constructed (missing
    /// database, unsupported adapter, unwritable queue directory).
    pub async fn from_config(
        config: &AppConfig,
        registry: Arc<HandlerRegistry>,
        events: Arc<EventBus>,
    ) -> Result<Self, QueueError> {
        let retry_after = Duration::from_secs(config.queue.retry_after);

        let backend: Arc<dyn QueueBackend> = match config.queue.driver {
            QueueDriver::Database => {
                Arc::new(DatabaseQueue::from_config(&config.database, retry_after).await?)
            }
            QueueDriver::File => {
                Arc::new(FileQueue::new(&config.queue.file_path, retry_after)?)
            }
            QueueDriver::Sync => Arc::new(SyncQueue::new(registry.clone())),
        };

        Ok(Self::new(backend, registry, events)
            .with_default_queue(config.queue.default.clone())
            .with_max_attempts(config.queue.max_attempts)
            .with_backoff(BackoffPolicy::new(config.queue.backoff)))
    }

    /// Set the queue used when a caller supplies none.
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Set the terminal attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The queue used when a caller supplies none.
    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// The event bus this manager emits on.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The underlying backend.
    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    fn resolve_queue<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    /// Delay applied before the next attempt after `attempts` reservations.
    pub fn calculate_backoff(&self, attempts: u32) -> Duration {
        self.backoff.delay_for(attempts)
    }

    /// Enqueue a job for the named handler. Resolves the queue to the
    /// default when `None`; the record becomes available after `delay`.
    pub async fn dispatch(
        &self,
        handler: &str,
        args: JobArgs,
        queue: Option<&str>,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let payload = JobPayload::new(handler, args);
        let queue = self.resolve_queue(queue);
        self.backend.push(&payload, queue, delay).await
    }

    /// Invoke the named handler synchronously in the current task,
    /// bypassing all queue machinery, and return its result.
    pub async fn dispatch_now(&self, handler: &str, args: &JobArgs) -> Result<Value, QueueError> {
        let handler = self
            .registry
            .resolve(handler)
            .map_err(|e| QueueError::Handler(e.to_string()))?;
        handler
            .execute(args)
            .await
            .map_err(|e| QueueError::Handler(e.to_string()))
    }

    /// Reserve and process the next available record in `queue`.
    ///
    /// Returns `true` when work happened (success or failure) and `false`
    /// when the queue was empty; workers use `false` to decide whether to
    /// sleep. Backend failures during `pop` are logged and reported as
    /// `false` so a transient outage cannot crash the worker.
    pub async fn process_next_job(&self, queue: Option<&str>) -> bool {
        let queue = self.resolve_queue(queue);

        let record = match self.backend.pop(queue).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(queue, error = %e, "failed to pop next job");
                return false;
            }
        };

        let started = Instant::now();
        let outcome = self.invoke(&record).await;

        match outcome {
            Ok(_) => {
                if let Err(e) = self.backend.delete(&record).await {
                    // At-least-once: the record will come back after the
                    // visibility timeout and the handler must tolerate it.
                    tracing::error!(
                        job_id = %record.id,
                        queue,
                        error = %e,
                        "failed to delete completed job; it will be redelivered"
                    );
                }
                self.events
                    .emit(Event::job_processed(
                        record.id.clone(),
                        record.payload.class.clone(),
                        record.payload.args.clone(),
                        record.queue.clone(),
                        started.elapsed().as_secs_f64(),
                    ))
                    .await;
            }
            Err(error) => {
                tracing::warn!(
                    job_id = %record.id,
                    queue,
                    handler = %record.payload.class,
                    attempts = record.attempts,
                    error = %error,
                    "job failed"
                );
                self.events
                    .emit(Event::job_failed(
                        record.id.clone(),
                        record.payload.class.clone(),
                        record.payload.args.clone(),
                        record.queue.clone(),
                        error.clone(),
                        record.attempts,
                    ))
                    .await;
                self.handle_failure(&record, error).await;
            }
        }

        true
    }

    /// Construct and invoke the record's handler, formatting any failure
    /// as an exception string (error kind plus message).
    async fn invoke(&self, record: &JobRecord) -> Result<Value, String> {
        let handler = match self.registry.resolve(&record.payload.class) {
            Ok(handler) => handler,
            Err(e @ RegistryError::HandlerNotFound(_)) => {
                return Err(format!("HandlerNotFound: {}", e));
            }
            Err(e @ RegistryError::ContractViolation { .. }) => {
                return Err(format!("HandlerContractViolation: {}", e));
            }
        };

        handler
            .execute(&record.payload.args)
            .await
            .map_err(|e| format!("HandlerFailed: {}", e))
    }

    /// Apply the retry policy to a failed record: release with backoff
    /// while attempts remain, otherwise move it to failed storage.
    async fn handle_failure(&self, record: &JobRecord, error: String) {
        if record.attempts < self.max_attempts {
            let delay = self.calculate_backoff(record.attempts);
            if let Err(e) = self.backend.release(record, delay).await {
                tracing::error!(
                    job_id = %record.id,
                    error = %e,
                    "failed to release job for retry; it will be redelivered after the visibility timeout"
                );
            }
            return;
        }

        if let Err(e) = self.backend.mark_failed(record, &error).await {
            tracing::error!(
                job_id = %record.id,
                error = %e,
                "failed to move job to failed storage; it will be redelivered after the visibility timeout"
            );
            return;
        }

        self.events
            .emit(Event::job_max_attempts_reached(
                record.id.clone(),
                record.payload.class.clone(),
                record.payload.args.clone(),
                record.queue.clone(),
                error,
                self.max_attempts,
            ))
            .await;
    }

    /// Count pending records in `queue` (the default queue when `None`).
    pub async fn size(&self, queue: Option<&str>) -> Result<u64, QueueError> {
        self.backend.size(self.resolve_queue(queue)).await
    }

    /// Delete all records in `queue` (the default queue when `None`).
    pub async fn clear(&self, queue: Option<&str>) -> Result<u64, QueueError> {
        self.backend.clear(self.resolve_queue(queue)).await
    }

    /// Failed records, newest first.
    pub async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError> {
        self.backend.failed_jobs().await
    }

    /// Requeue one failed record as a fresh job.
    pub async fn retry_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        self.backend.retry_failed_job(id).await
    }

    /// Delete one failed record.
    pub async fn forget_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        self.backend.forget_failed_job(id).await
    }

    /// Delete all failed records.
    pub async fn clear_failed_jobs(&self) -> Result<u64, QueueError> {
        self.backend.clear_failed_jobs().await
    }
}
