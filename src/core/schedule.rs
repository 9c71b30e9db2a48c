//! Cron expression parsing and due-ness evaluation.
//!
//! Supports standard 5-field cron expressions (`minute hour day-of-month
//! month day-of-week`, Sunday = 0) and the usual shortcuts (`@daily`,
//! `@hourly`, ...). Due-ness is evaluated at one-minute granularity in the
//! schedule's timezone.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// A parsed cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// IANA timezone the expression is evaluated in.
    timezone: String,
    /// Parsed schedule; present on every constructed value, absent after
    /// deserialization (callers rebuild schedules from the expression).
    #[serde(skip)]
    parsed: Option<CronSchedule>,
}

impl Schedule {
    /// Create a new schedule from a cron expression, evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Create a new schedule evaluated in a specific timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.into();

        timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.clone()))?;

        let parsed = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            parsed: Some(parsed),
        })
    }

    /// Parse an expression, resolving shortcuts first.
    fn parse_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_cron(Self::resolve_shortcut(trimmed)?);
        }

        Self::parse_cron(trimmed)
    }

    /// Map a shortcut to its 5-field equivalent.
    fn resolve_shortcut(expression: &str) -> Result<&'static str, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Ok("0 0 1 1 *"),
            "@monthly" => Ok("0 0 1 * *"),
            "@weekly" => Ok("0 0 * * 0"),
            "@daily" | "@midnight" => Ok("0 0 * * *"),
            "@hourly" => Ok("0 * * * *"),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    /// Parse a 5-field cron expression.
    fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields, got {}",
                fields.len()
            )));
        }

        // The cron crate numbers day-of-week 1-7 with 1 = Sunday; the
        // accepted convention here is 0-6 with 0 = Sunday.
        let weekday = normalize_weekday_field(fields[4])?;

        // Prepend a seconds field so the minute-granular expression parses.
        let cron_expr = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        );

        CronSchedule::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))
    }

    /// Whether the schedule fires in the minute containing `at`.
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        let Some(parsed) = &self.parsed else {
            return false;
        };
        let Ok(tz) = self.timezone.parse::<Tz>() else {
            return false;
        };

        let local = minute_of(at).with_timezone(&tz);
        parsed.includes(local)
    }

    /// Get the next firing time after the given instant.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let parsed = self.parsed.as_ref()?;
        let tz: Tz = self.timezone.parse().ok()?;

        let local = after.with_timezone(&tz);
        parsed.after(&local).next().map(|dt| dt.with_timezone(&Utc))
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

/// Truncate an instant to the start of its minute.
pub fn minute_of(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Rewrite a day-of-week field from the Sunday=0 convention to the cron
/// crate's Sunday=1 ordinals. Named days (`SUN`-`SAT`) pass through.
fn normalize_weekday_field(field: &str) -> Result<String, ScheduleError> {
    let items: Result<Vec<String>, ScheduleError> = field
        .split(',')
        .map(normalize_weekday_item)
        .collect();
    Ok(items?.join(","))
}

fn normalize_weekday_item(item: &str) -> Result<String, ScheduleError> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };

    let mapped = if base == "*" {
        base.to_string()
    } else if let Some((start, end)) = base.split_once('-') {
        format!("{}-{}", normalize_weekday_value(start)?, normalize_weekday_value(end)?)
    } else {
        normalize_weekday_value(base)?
    };

    Ok(match step {
        Some(step) => format!("{}/{}", mapped, step),
        None => mapped,
    })
}

fn normalize_weekday_value(value: &str) -> Result<String, ScheduleError> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        // Named day; the cron crate accepts SUN-SAT directly.
        return Ok(value.to_string());
    }

    let n: u8 = value
        .parse()
        .map_err(|_| ScheduleError::InvalidCron(format!("invalid day-of-week: {}", value)))?;
    if n > 6 {
        return Err(ScheduleError::InvalidCron(format!(
            "day-of-week must be 0-6 (0 = Sunday), got {}",
            n
        )));
    }
    Ok((n + 1).to_string())
}
