//! Cron-driven scheduler.
//!
//! The scheduler owns an in-memory list of schedule entries loaded at
//! startup and evaluates them against the wall clock on every poll. A due
//! entry either runs its handler inline in the scheduler process or is
//! dispatched through the queue manager.
//!
//! The scheduler is not durable: ticks missed while the process is down
//! are not replayed. Durability belongs to the queue, reached by giving an
//! entry a target queue.

mod engine;
mod entry;

pub use engine::{Scheduler, SchedulerHandle};
pub use entry::ScheduleEntry;
