//! Configuration sections

use crate::constants::{
    DEFAULT_COMMITTED_RETENTION_SECS, DEFAULT_ROLLBACK_LIFETIME_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use rbk_types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: OutputFormat::Table,
        }
    }
}

/// Rollback lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// How long an available rollback stays committable
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    /// Interval between background expiration sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long committed rollbacks stay in history at most
    #[serde(default = "default_committed_retention_secs")]
    pub committed_retention_secs: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: DEFAULT_ROLLBACK_LIFETIME_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            committed_retention_secs: DEFAULT_COMMITTED_RETENTION_SECS,
        }
    }
}

impl RollbackConfig {
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub fn committed_retention(&self) -> Duration {
        Duration::from_secs(self.committed_retention_secs)
    }
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub data_dir: Option<PathBuf>,
}

// Default value functions for serde
fn default_output_format() -> OutputFormat {
    OutputFormat::Table
}

fn default_lifetime_secs() -> u64 {
    DEFAULT_ROLLBACK_LIFETIME_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_committed_retention_secs() -> u64 {
    DEFAULT_COMMITTED_RETENTION_SECS
}
