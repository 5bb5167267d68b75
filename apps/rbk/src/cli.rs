//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rbk - inspect package rollback state
#[derive(Parser)]
#[command(name = "rbk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect package rollback state")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Rollback data directory (overrides config and RBK_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// List rollbacks that can be committed
    #[command(alias = "ls")]
    List,

    /// List recently committed rollbacks
    Committed,

    /// Show one rollback in any state
    Show {
        /// Rollback id
        id: u64,
    },

    /// List rollbacks quarantined after a partial reversion
    Quarantined,

    /// Check the data directory without modifying it
    Verify,
}
