//! Package reversion capability consumed by commit

use async_trait::async_trait;
use rbk_types::{PackageRollbackInfo, RollbackInfo, SessionId};
use thiserror::Error;

/// Failure reported by a [`PackageReverter`]
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .package.as_deref().unwrap_or("session"))]
pub struct RevertError {
    /// Package the step failed on; `None` for session-level failures
    pub package: Option<String>,
    pub message: String,
}

impl RevertError {
    pub fn package(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self {
            package: None,
            message: message.into(),
        }
    }
}

/// Two-phase package reversion
///
/// `stage` prepares a package inside a session without any observable
/// effect; `apply` makes one staged package live. `abandon` discards
/// everything staged in a session that has not been applied.
#[async_trait]
pub trait PackageReverter: Send + Sync {
    /// Open a reversion session for `rollback`
    async fn open_session(&self, rollback: &RollbackInfo) -> Result<SessionId, RevertError>;

    async fn stage(
        &self,
        session: SessionId,
        package: &PackageRollbackInfo,
    ) -> Result<(), RevertError>;

    async fn apply(
        &self,
        session: SessionId,
        package: &PackageRollbackInfo,
    ) -> Result<(), RevertError>;

    async fn abandon(&self, session: SessionId) -> Result<(), RevertError>;
}
