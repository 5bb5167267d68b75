#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for rbk
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/rbk/config.toml)
//! - Environment variables
//! - CLI flags

pub mod constants;
pub mod core;

pub use crate::core::{GeneralConfig, PathConfig, RollbackConfig};

use rbk_errors::{ConfigError, Error};
use rbk_types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub rollback: RollbackConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("rbk").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if fs::try_exists(&config_path).await.unwrap_or(false) {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // RBK_OUTPUT
        if let Ok(output) = std::env::var("RBK_OUTPUT") {
            self.general.default_output = match output.as_str() {
                "table" => OutputFormat::Table,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "RBK_OUTPUT".to_string(),
                        value: output,
                    }
                    .into())
                }
            };
        }

        if let Ok(value) = std::env::var("RBK_ROLLBACK_LIFETIME_SECS") {
            self.rollback.lifetime_secs = parse_secs("RBK_ROLLBACK_LIFETIME_SECS", value)?;
        }

        if let Ok(value) = std::env::var("RBK_SWEEP_INTERVAL_SECS") {
            self.rollback.sweep_interval_secs = parse_secs("RBK_SWEEP_INTERVAL_SECS", value)?;
        }

        if let Ok(value) = std::env::var("RBK_COMMITTED_RETENTION_SECS") {
            self.rollback.committed_retention_secs =
                parse_secs("RBK_COMMITTED_RETENTION_SECS", value)?;
        }

        // RBK_DATA_DIR
        if let Ok(dir) = std::env::var("RBK_DATA_DIR") {
            if dir.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "RBK_DATA_DIR".to_string(),
                    value: dir,
                }
                .into());
            }
            self.paths.data_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a zero lifetime or sweep interval.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rollback.lifetime_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "rollback.lifetime_secs must be greater than zero".to_string(),
            }
            .into());
        }
        if self.rollback.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "rollback.sweep_interval_secs must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Get the data directory (with default)
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_DATA_DIR))
    }
}

fn parse_secs(field: &str, value: String) -> Result<u64, Error> {
    value.parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into()
    })
}
