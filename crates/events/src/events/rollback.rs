use serde::{Deserialize, Serialize};
use rbk_types::{JournalPhase, RollbackId, RollbackState, SessionId};
use std::time::Duration;

use super::FailureContext;

/// Why a pending rollback stopped being available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The rollback lifetime elapsed
    LifetimeElapsed,
    /// Explicitly expired for a package
    PackageExpired,
    /// A covered package was uninstalled
    PackageUninstalled,
}

/// Why a committed rollback was dropped from history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    PackageUninstalled,
    UpgradedPastRolledBackVersion,
    RetentionElapsed,
}

/// Rollback lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RollbackEvent {
    /// A rollback-enabled install was recorded
    Enabled {
        rollback_id: RollbackId,
        packages: Vec<String>,
        is_staged: bool,
    },

    /// The originating install finished; the rollback can be committed
    Available { rollback_id: RollbackId },

    /// Commit accepted and validated; reversion is starting
    CommitStarted {
        rollback_id: RollbackId,
        session_id: SessionId,
        packages: usize,
    },

    /// Installed versions do not match the rollback
    ValidationFailed {
        rollback_id: RollbackId,
        mismatches: Vec<String>,
    },

    /// All packages were reverted
    Committed {
        rollback_id: RollbackId,
        session_id: SessionId,
        duration: Duration,
    },

    /// Commit failed without changing any package
    CommitFailed {
        rollback_id: RollbackId,
        failure: FailureContext,
    },

    /// Some packages were reverted and others were not; the entry is quarantined
    PartiallyApplied {
        rollback_id: RollbackId,
        applied: Vec<String>,
        failed_package: Option<String>,
        error: String,
    },

    /// A pending rollback expired
    Expired {
        rollback_id: RollbackId,
        reason: ExpiryReason,
    },

    /// A pending rollback was superseded by a newer install
    Cancelled {
        rollback_id: RollbackId,
        package: String,
    },

    /// A committed rollback is no longer relevant
    Pruned {
        rollback_id: RollbackId,
        reason: PruneReason,
    },

    /// An interrupted commit was resolved while loading
    Recovered {
        rollback_id: RollbackId,
        phase: JournalPhase,
        state: RollbackState,
    },

    /// An operator removed a quarantined rollback
    QuarantineCleared { rollback_id: RollbackId },

    /// In-memory state was rebuilt from the store
    Reloaded {
        records: usize,
        corrupt_records: usize,
    },

    /// Periodic or on-demand sweep finished
    SweepCompleted { expired: usize, pruned: usize },
}
