//! Typed configuration structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::payload::JobArgs;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Queue engine settings.
    pub queue: QueueConfig,
    /// Database connection settings (database driver only).
    pub database: DatabaseConfig,
}

/// Queue driver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDriver {
    /// Relational backend (recommended, default).
    #[default]
    Database,
    /// Local-filesystem backend.
    File,
    /// Inline-synchronous backend for tests and local development.
    Sync,
}

impl fmt::Display for QueueDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueDriver::Database => write!(f, "database"),
            QueueDriver::File => write!(f, "file"),
            QueueDriver::Sync => write!(f, "sync"),
        }
    }
}

/// Queue engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backend variant.
    pub driver: QueueDriver,
    /// Queue name used when a caller supplies none.
    pub default: String,
    /// Visibility timeout in seconds: a record reserved longer than this
    /// is returned to the pending state with its attempt count intact.
    /// Handler execution time counts against it.
    pub retry_after: u64,
    /// Terminal attempt count; a record failing on this attempt moves to
    /// failed storage.
    pub max_attempts: u32,
    /// Base seconds for exponential retry delay; 0 re-enqueues
    /// immediately.
    pub backoff: u64,
    /// Root directory for the file driver.
    pub file_path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            driver: QueueDriver::Database,
            default: "default".to_string(),
            retry_after: 90,
            max_attempts: 3,
            backoff: 0,
            file_path: PathBuf::from("queue"),
        }
    }
}

/// Database adapter selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseAdapter {
    /// SQLite (default, the only wired adapter).
    #[default]
    Sqlite,
    /// MySQL (recognized, not wired).
    Mysql,
    /// PostgreSQL (recognized, not wired).
    Pgsql,
}

impl fmt::Display for DatabaseAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseAdapter::Sqlite => write!(f, "sqlite"),
            DatabaseAdapter::Mysql => write!(f, "mysql"),
            DatabaseAdapter::Pgsql => write!(f, "pgsql"),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Adapter selection.
    pub adapter: DatabaseAdapter,
    /// Database name; for sqlite, the database file path.
    pub name: String,
    /// Server host (network adapters only).
    pub host: Option<String>,
    /// Server port (network adapters only).
    pub port: Option<u16>,
    /// Username (network adapters only).
    pub user: Option<String>,
    /// Password (network adapters only).
    pub pass: Option<String>,
    /// Connection charset (network adapters only).
    pub charset: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            adapter: DatabaseAdapter::Sqlite,
            name: "tempo.db".to_string(),
            host: None,
            port: None,
            user: None,
            pass: None,
            charset: None,
        }
    }
}

/// Parsed schedule file: entry name to entry definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleFile {
    /// Schedule entries keyed by name.
    pub schedule: BTreeMap<String, ScheduleEntryConfig>,
}

/// One schedule entry definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntryConfig {
    /// Fully-qualified handler name.
    pub class: String,
    /// 5-field cron expression or shortcut.
    pub cron: String,
    /// Argument bag passed on every firing.
    #[serde(default)]
    pub args: JobArgs,
    /// Target queue; when absent the handler runs inline.
    #[serde(default)]
    pub queue: Option<String>,
    /// IANA timezone the cron expression is evaluated in (default UTC).
    #[serde(default)]
    pub timezone: Option<String>,
}
