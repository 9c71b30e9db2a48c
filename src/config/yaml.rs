//! YAML configuration loading.

use std::path::Path;

use super::error::ConfigError;
use super::types::{AppConfig, ScheduleFile};

/// Loader for the application configuration and schedule files.
pub struct YamlLoader;

impl YamlLoader {
    /// Load the application configuration from a YAML file.
    pub fn load_app_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse_app_config(&contents)
    }

    /// Parse the application configuration from a YAML string.
    pub fn parse_app_config(contents: &str) -> Result<AppConfig, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load a schedule file.
    pub fn load_schedule(path: impl AsRef<Path>) -> Result<ScheduleFile, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a schedule file from a YAML string.
    pub fn parse_schedule(contents: &str) -> Result<ScheduleFile, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
