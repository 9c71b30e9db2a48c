//! Testing utilities for users of the tempo library.
//!
//! This module provides helpers for testing queue processing:
//!
//! - [`RecordingHandler`]: a job handler that records its invocations
//! - [`FailingHandler`]: a job handler that fails N times then succeeds
//! - [`RecordingEvents`]: an event listener that captures emitted events
//!
//! The handlers are cheap to clone and share their state, so a test can
//! register a clone with a [`HandlerRegistry`](crate::registry::HandlerRegistry)
//! factory and inspect the original afterwards.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::payload::JobArgs;
use crate::events::{Event, EventHandler};
use crate::registry::{Handler, HandlerError};

/// A job handler that records every invocation and returns a configured
/// value.
///
/// # Example
///
/// ```
/// use tempo::registry::HandlerRegistry;
/// use tempo::testing::RecordingHandler;
///
/// let handler = RecordingHandler::new("jobs.Test");
/// let mut registry = HandlerRegistry::new();
/// let clone = handler.clone();
/// registry.register("jobs.Test", move || clone.clone());
/// ```
#[derive(Clone)]
pub struct RecordingHandler {
    name: String,
    result: Value,
    invocations: Arc<Mutex<Vec<JobArgs>>>,
}

impl RecordingHandler {
    /// Create a handler that succeeds with the result `"ok"`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: json!("ok"),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the value returned on success.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// The handler's registered name, owned.
    pub fn name_string(&self) -> String {
        self.name.clone()
    }

    /// Number of times the handler has been invoked.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.lock().await.len()
    }

    /// Argument bags of every invocation, in order.
    pub async fn invocations(&self) -> Vec<JobArgs> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: &JobArgs) -> Result<Value, HandlerError> {
        self.invocations.lock().await.push(args.clone());
        Ok(self.result.clone())
    }
}

/// Internal state for [`FailingHandler`].
struct FailingState {
    failures_remaining: u32,
    call_count: u32,
}

/// A job handler that fails a configurable number of times before
/// succeeding.
///
/// Useful for exercising the retry path. Pass `u32::MAX` to fail forever.
#[derive(Clone)]
pub struct FailingHandler {
    name: String,
    error_message: String,
    state: Arc<Mutex<FailingState>>,
}

impl FailingHandler {
    /// Create a handler that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self {
            name: name.into(),
            error_message: "intentional test failure".to_string(),
            state: Arc::new(Mutex::new(FailingState {
                failures_remaining: fail_count,
                call_count: 0,
            })),
        }
    }

    /// Create a handler that fails with a custom error message.
    pub fn with_error(
        name: impl Into<String>,
        fail_count: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            error_message: message.into(),
            state: Arc::new(Mutex::new(FailingState {
                failures_remaining: fail_count,
                call_count: 0,
            })),
        }
    }

    /// The handler's registered name, owned.
    pub fn name_string(&self) -> String {
        self.name.clone()
    }

    /// Number of times the handler has been invoked.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }
}

#[async_trait]
impl Handler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _args: &JobArgs) -> Result<Value, HandlerError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining = state.failures_remaining.saturating_sub(1);
            Err(HandlerError::msg(self.error_message.clone()))
        } else {
            Ok(json!("ok"))
        }
    }
}

/// Event listener that records every emitted event.
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    /// Create a recording listener, ready to register on an event bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// All recorded events, in emission order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of `JobProcessed` events.
    pub async fn processed_count(&self) -> usize {
        self.count(|e| matches!(e, Event::JobProcessed { .. })).await
    }

    /// Number of `JobFailed` events.
    pub async fn failed_count(&self) -> usize {
        self.count(|e| matches!(e, Event::JobFailed { .. })).await
    }

    /// Number of `JobMaxAttemptsReached` events.
    pub async fn max_attempts_count(&self) -> usize {
        self.count(|e| matches!(e, Event::JobMaxAttemptsReached { .. }))
            .await
    }

    /// Number of `SchedulerJobTriggered` events.
    pub async fn triggered_count(&self) -> usize {
        self.count(|e| matches!(e, Event::SchedulerJobTriggered { .. }))
            .await
    }

    /// Number of `WorkerStarted` events.
    pub async fn worker_started_count(&self) -> usize {
        self.count(|e| matches!(e, Event::WorkerStarted { .. })).await
    }

    /// Number of `WorkerStopped` events.
    pub async fn worker_stopped_count(&self) -> usize {
        self.count(|e| matches!(e, Event::WorkerStopped { .. })).await
    }

    async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingEvents {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
