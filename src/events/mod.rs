//! Lifecycle events and event handling.
//!
//! This module provides event emission for queue, worker, and scheduler
//! lifecycle events, enabling observability into job processing. Delivery
//! is best-effort and synchronous from the emitter's point of view.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::core::payload::JobArgs;
use crate::core::types::{JobId, WorkerId};

/// Lifecycle events emitted during job processing.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job completed successfully and was removed from its queue.
    JobProcessed {
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        execution_seconds: f64,
        timestamp: Instant,
    },

    /// A job invocation failed. Emitted on every failed attempt, including
    /// the terminal one.
    JobFailed {
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        error: String,
        /// Reservation count at the time of the failure.
        attempts: u32,
        timestamp: Instant,
    },

    /// A job exhausted its attempts and was moved to failed storage.
    JobMaxAttemptsReached {
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        error: String,
        max_attempts: u32,
        timestamp: Instant,
    },

    /// A worker entered its run loop.
    WorkerStarted {
        worker_id: WorkerId,
        queues: Vec<String>,
        timestamp: Instant,
    },

    /// A worker exited its run loop.
    WorkerStopped {
        worker_id: WorkerId,
        jobs_processed: u64,
        timestamp: Instant,
    },

    /// A schedule entry came due and was triggered.
    SchedulerJobTriggered {
        name: String,
        handler: String,
        cron: String,
        /// Target queue; `None` means the handler ran inline.
        queue: Option<String>,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobProcessed { timestamp, .. } => *timestamp,
            Event::JobFailed { timestamp, .. } => *timestamp,
            Event::JobMaxAttemptsReached { timestamp, .. } => *timestamp,
            Event::WorkerStarted { timestamp, .. } => *timestamp,
            Event::WorkerStopped { timestamp, .. } => *timestamp,
            Event::SchedulerJobTriggered { timestamp, .. } => *timestamp,
        }
    }

    /// Create a JobProcessed event.
    pub fn job_processed(
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        execution_seconds: f64,
    ) -> Self {
        Event::JobProcessed {
            job_id,
            handler,
            args,
            queue,
            execution_seconds,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobFailed event.
    pub fn job_failed(
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        error: String,
        attempts: u32,
    ) -> Self {
        Event::JobFailed {
            job_id,
            handler,
            args,
            queue,
            error,
            attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobMaxAttemptsReached event.
    pub fn job_max_attempts_reached(
        job_id: JobId,
        handler: String,
        args: JobArgs,
        queue: String,
        error: String,
        max_attempts: u32,
    ) -> Self {
        Event::JobMaxAttemptsReached {
            job_id,
            handler,
            args,
            queue,
            error,
            max_attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a WorkerStarted event.
    pub fn worker_started(worker_id: WorkerId, queues: Vec<String>) -> Self {
        Event::WorkerStarted {
            worker_id,
            queues,
            timestamp: Instant::now(),
        }
    }

    /// Create a WorkerStopped event.
    pub fn worker_stopped(worker_id: WorkerId, jobs_processed: u64) -> Self {
        Event::WorkerStopped {
            worker_id,
            jobs_processed,
            timestamp: Instant::now(),
        }
    }

    /// Create a SchedulerJobTriggered event.
    pub fn scheduler_job_triggered(
        name: String,
        handler: String,
        cron: String,
        queue: Option<String>,
    ) -> Self {
        Event::SchedulerJobTriggered {
            name,
            handler,
            cron,
            queue,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
