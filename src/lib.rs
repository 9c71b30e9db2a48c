//! tempo - an embeddable cron scheduler and durable background job queue.
//!
//! The engine couples two pieces:
//!
//! - a [`Scheduler`] that fires named handlers on cron expressions, either
//!   inline or by dispatching onto a queue;
//! - a [`QueueManager`] over a pluggable [`QueueBackend`] that persists
//!   dispatched jobs, hands them to [`Worker`]s under a visibility-timeout
//!   reservation protocol, retries failures with bounded attempts and
//!   exponential backoff, and parks permanently-failed jobs for operator
//!   inspection.
//!
//! Delivery is at-least-once: a handler may be invoked more than once with
//! the same arguments and must be idempotent.

pub mod config;
pub mod core;
pub mod events;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod testing;
pub mod worker;

pub use self::config::{
    AppConfig, ConfigError, DatabaseAdapter, DatabaseConfig, QueueConfig, QueueDriver,
    ScheduleEntryConfig, ScheduleFile, YamlLoader,
};
pub use self::core::backoff::BackoffPolicy;
pub use self::core::payload::{JobArgs, JobPayload, PayloadError};
pub use self::core::record::{FailedJob, JobRecord};
pub use self::core::schedule::{Schedule, ScheduleError};
pub use self::core::types::{JobId, WorkerId};
pub use self::events::{Event, EventBus, EventHandler};
pub use self::queue::{
    DatabaseQueue, FileQueue, MemoryQueue, QueueBackend, QueueError, QueueManager, SyncQueue,
};
pub use self::registry::{Handler, HandlerError, HandlerRegistry, RegistryError};
pub use self::scheduler::{ScheduleEntry, Scheduler, SchedulerHandle};
pub use self::worker::{Worker, WorkerHandle};
