//! Schedule entries.

use chrono::{DateTime, Utc};

use crate::core::payload::JobArgs;
use crate::core::schedule::{minute_of, Schedule, ScheduleError};

/// A static scheduling record: created at startup, read-only thereafter
/// except for the last-fired guard.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    name: String,
    schedule: Schedule,
    handler: String,
    args: JobArgs,
    queue: Option<String>,
    /// Minute of the most recent firing, used to guard against re-firing
    /// when the poll interval is shorter than a minute.
    last_fired_minute: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// Create an entry. Invalid cron expressions fail here, at load time.
    pub fn new(
        name: impl Into<String>,
        cron: &str,
        handler: impl Into<String>,
        args: JobArgs,
        queue: Option<String>,
    ) -> Result<Self, ScheduleError> {
        Self::with_timezone(name, cron, "UTC", handler, args, queue)
    }

    /// Create an entry whose cron expression is evaluated in the given
    /// timezone.
    pub fn with_timezone(
        name: impl Into<String>,
        cron: &str,
        timezone: &str,
        handler: impl Into<String>,
        args: JobArgs,
        queue: Option<String>,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            name: name.into(),
            schedule: Schedule::with_timezone(cron, timezone)?,
            handler: handler.into(),
            args,
            queue,
            last_fired_minute: None,
        })
    }

    /// Entry name, unique within a schedule, used for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parsed schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Fully-qualified handler name.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Argument bag passed on every firing.
    pub fn args(&self) -> &JobArgs {
        &self.args
    }

    /// Target queue; `None` means the handler runs inline.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Whether the entry is due at `now` and has not already fired in this
    /// minute.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.last_fired_minute == Some(minute_of(now)) {
            return false;
        }
        self.schedule.is_due(now)
    }

    /// Record that the entry fired in the minute containing `now`.
    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_fired_minute = Some(minute_of(now));
    }
}
