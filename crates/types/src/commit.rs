//! Commit status delivery and the commit journal

use crate::rollback::{RollbackId, SessionId};
use chrono::{DateTime, Utc};
use rbk_errors::{Error, RollbackError};
use serde::{Deserialize, Serialize};

/// Why a commit did not succeed, as reported to the requesting caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailureReason {
    /// The id does not name an available rollback
    NotFound,
    /// Installed versions no longer match the rollback
    InconsistentState,
    /// Reversion failed before any package changed; the rollback is still available
    RevertFailed,
    /// Some packages were reverted and others were not; the rollback is quarantined
    PartialRollbackFailure,
    /// Persistence or other internal failure
    Internal,
}

impl From<&Error> for CommitFailureReason {
    fn from(err: &Error) -> Self {
        match err.as_rollback() {
            Some(RollbackError::NotFound { .. }) => Self::NotFound,
            Some(RollbackError::InconsistentState { .. }) => Self::InconsistentState,
            Some(RollbackError::RevertFailed { .. }) => Self::RevertFailed,
            Some(RollbackError::PartialRollbackFailure { .. }) => Self::PartialRollbackFailure,
            _ => Self::Internal,
        }
    }
}

/// Asynchronous completion signal for a commit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub rollback_id: RollbackId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CommitFailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommitStatus {
    #[must_use]
    pub fn succeeded(rollback_id: RollbackId) -> Self {
        Self {
            rollback_id,
            success: true,
            failure: None,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(rollback_id: RollbackId, err: &Error) -> Self {
        Self {
            rollback_id,
            success: false,
            failure: Some(CommitFailureReason::from(err)),
            message: Some(err.to_string()),
        }
    }
}

/// Phase of an in-flight commit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Packages are being staged; nothing observable has changed yet
    Staging,
    /// Staged packages are being applied; partial effect is possible
    Applying,
}

/// Commit journal for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitJournal {
    pub rollback_id: RollbackId,
    pub session_id: SessionId,
    pub phase: JournalPhase,
    /// Packages whose apply step finished
    #[serde(default)]
    pub applied: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl CommitJournal {
    #[must_use]
    pub fn staging(rollback_id: RollbackId, session_id: SessionId, started_at: DateTime<Utc>) -> Self {
        Self {
            rollback_id,
            session_id,
            phase: JournalPhase::Staging,
            applied: Vec::new(),
            started_at,
        }
    }
}
