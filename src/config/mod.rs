//! # YAML configuration
//!
//! Two documents drive a deployment:
//!
//! ## Application configuration
//!
//! ```yaml
//! queue:
//!   driver: database        # database | file | sync
//!   default: default
//!   retry_after: 90         # visibility timeout, seconds
//!   max_attempts: 3
//!   backoff: 0              # base seconds for exponential retry delay
//!   file_path: queue        # file driver only
//! database:
//!   adapter: sqlite
//!   name: tempo.db
//! ```
//!
//! ## Schedule file
//!
//! ```yaml
//! schedule:
//!   nightly-report:
//!     class: jobs.SendReport
//!     cron: "0 2 * * *"
//!     args:
//!       recipients: ops
//!     queue: mail           # omit to run inline in the scheduler
//!   heartbeat:
//!     class: log
//!     cron: "* * * * *"
//! ```
//!
//! Every field has a default except a schedule entry's `class` and `cron`.
//! Operators should keep `retry_after` comfortably above the worst-case
//! handler duration: a reservation is taken when a worker pops a record
//! and is never renewed, so a handler still running at the timeout will
//! see its record redelivered to another worker.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    AppConfig, DatabaseAdapter, DatabaseConfig, QueueConfig, QueueDriver, ScheduleEntryConfig,
    ScheduleFile,
};
pub use yaml::YamlLoader;
