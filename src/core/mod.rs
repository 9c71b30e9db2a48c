//! Core value types: identifiers, payloads, records, schedules, backoff.

pub mod backoff;
pub mod payload;
pub mod record;
pub mod schedule;
pub mod types;
