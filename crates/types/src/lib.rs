#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the rbk rollback engine
//!
//! This crate provides the rollback data model shared by the store, the
//! lifecycle manager and the CLI.

pub mod commit;
pub mod package;
pub mod rollback;

// Re-export commonly used types
pub use commit::{CommitFailureReason, CommitJournal, CommitStatus, JournalPhase};
pub use package::{PackageRollbackInfo, VersionCode, VersionedPackage};
pub use rollback::{
    RollbackId, RollbackInfo, RollbackRecord, RollbackState, SessionId, RECORD_FORMAT_VERSION,
};
pub use uuid::Uuid;

use serde::{Deserialize, Serialize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Table
    }
}
