//! Rollback lifecycle error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RollbackError {
    #[error("no available rollback with id {id}")]
    NotFound { id: u64 },

    #[error("package {package} already has a pending rollback ({existing})")]
    DuplicatePendingRollback { package: String, existing: u64 },

    #[error("rollback {id} is inconsistent with installed packages: {details}")]
    InconsistentState { id: u64, details: String },

    #[error("reverting rollback {id} failed before any package changed: {message}")]
    RevertFailed { id: u64, message: String },

    #[error("rollback {id} was only partially applied (applied: {applied}): {message}")]
    PartialRollbackFailure {
        id: u64,
        applied: String,
        message: String,
    },

    #[error("invalid transition for rollback {id} from {from} to {to}")]
    InvalidTransition { id: u64, from: String, to: String },

    #[error("invalid rollback record: {message}")]
    InvalidRecord { message: String },
}

impl UserFacingError for RollbackError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => {
                Some("Refresh the list of available rollbacks; it may have expired or been committed.")
            }
            Self::DuplicatePendingRollback { .. } => {
                Some("Cancel or commit the existing rollback for the package first.")
            }
            Self::InconsistentState { .. } => {
                Some("Installed versions changed since the rollback was listed; refresh and retry.")
            }
            Self::PartialRollbackFailure { .. } => {
                Some("The rollback is quarantined; inspect the affected packages and reinstall them manually.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InconsistentState { .. } | Self::RevertFailed { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "rollback.not_found",
            Self::DuplicatePendingRollback { .. } => "rollback.duplicate_pending",
            Self::InconsistentState { .. } => "rollback.inconsistent_state",
            Self::RevertFailed { .. } => "rollback.revert_failed",
            Self::PartialRollbackFailure { .. } => "rollback.partial_failure",
            Self::InvalidTransition { .. } => "rollback.invalid_transition",
            Self::InvalidRecord { .. } => "rollback.invalid_record",
        };
        Some(code)
    }
}
