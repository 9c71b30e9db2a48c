//! Scheduler polling engine.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::entry::ScheduleEntry;
use crate::config::ScheduleFile;
use crate::core::payload::JobArgs;
use crate::core::schedule::ScheduleError;
use crate::events::{Event, EventBus};
use crate::queue::QueueManager;

/// Default interval between polls.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Handle for requesting the scheduler loop to stop.
#[derive(Clone)]
pub struct SchedulerHandle {
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    /// Request termination and return immediately. The tick in progress
    /// completes before the loop exits.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Cron evaluator and polling loop.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    manager: Arc<QueueManager>,
    events: Arc<EventBus>,
    interval: Duration,
    debug: bool,
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler dispatching through the given manager.
    pub fn new(manager: Arc<QueueManager>) -> Self {
        let events = manager.events();
        Self {
            entries: Vec::new(),
            manager,
            events,
            interval: DEFAULT_INTERVAL,
            debug: false,
            quit: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Debug mode breaks the loop after a single tick, for tests and the
    /// one-shot CLI mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Append an entry evaluated in UTC. Invalid cron expressions fail
    /// here, at load time, not at poll time.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        cron: &str,
        handler: impl Into<String>,
        args: JobArgs,
        queue: Option<String>,
    ) -> Result<(), ScheduleError> {
        self.entries
            .push(ScheduleEntry::new(name, cron, handler, args, queue)?);
        Ok(())
    }

    /// Append a pre-built entry.
    pub fn add_entry(&mut self, entry: ScheduleEntry) {
        self.entries.push(entry);
    }

    /// Load entries from a parsed schedule file. Entries with invalid cron
    /// expressions or timezones are logged and skipped; the rest load.
    /// Returns the number of entries loaded.
    pub fn load(&mut self, file: &ScheduleFile) -> usize {
        let mut loaded = 0;
        for (name, config) in &file.schedule {
            let timezone = config.timezone.as_deref().unwrap_or("UTC");
            match ScheduleEntry::with_timezone(
                name,
                &config.cron,
                timezone,
                &config.class,
                config.args.clone(),
                config.queue.clone(),
            ) {
                Ok(entry) => {
                    self.entries.push(entry);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::error!(entry = %name, error = %e, "skipping invalid schedule entry");
                }
            }
        }
        loaded
    }

    /// Registered entries.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Get a handle for stopping the loop from another task or a signal
    /// handler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            quit: self.quit.clone(),
            wake: self.wake.clone(),
        }
    }

    /// Evaluate every entry against the wall clock. Returns the number of
    /// entries fired.
    pub async fn poll(&mut self) -> usize {
        self.poll_at(Utc::now()).await
    }

    /// Evaluate every entry against an explicit instant.
    ///
    /// For each due entry the handler either runs inline (no queue) or is
    /// dispatched. Inline failures are logged and swallowed; a failing
    /// entry never aborts the tick.
    pub async fn poll_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;

        for entry in &mut self.entries {
            if !entry.is_due(now) {
                continue;
            }
            entry.mark_fired(now);
            fired += 1;

            tracing::info!(
                entry = %entry.name(),
                handler = %entry.handler(),
                cron = %entry.schedule().expression(),
                queue = entry.queue().unwrap_or("<inline>"),
                "schedule entry due"
            );
            self.events
                .emit(Event::scheduler_job_triggered(
                    entry.name().to_string(),
                    entry.handler().to_string(),
                    entry.schedule().expression().to_string(),
                    entry.queue().map(String::from),
                ))
                .await;

            match entry.queue() {
                Some(queue) => {
                    if let Err(e) = self
                        .manager
                        .dispatch(entry.handler(), entry.args().clone(), Some(queue), Duration::ZERO)
                        .await
                    {
                        tracing::error!(
                            entry = %entry.name(),
                            queue,
                            error = %e,
                            "failed to dispatch scheduled job"
                        );
                    }
                }
                None => {
                    if let Err(e) = self.manager.dispatch_now(entry.handler(), entry.args()).await {
                        tracing::error!(
                            entry = %entry.name(),
                            error = %e,
                            "scheduled job failed"
                        );
                    }
                }
            }
        }

        fired
    }

    /// Poll on the configured interval until stopped (or, in debug mode,
    /// once).
    pub async fn run(mut self) {
        tracing::info!(
            entries = self.entries.len(),
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        loop {
            let fired = self.poll().await;
            tracing::debug!(fired, "scheduler tick");

            if self.debug || self.quit.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }

            if self.quit.load(Ordering::SeqCst) {
                break;
            }
        }

        tracing::info!("scheduler stopped");
    }
}
