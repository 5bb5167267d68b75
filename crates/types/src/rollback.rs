//! Rollback entries and their lifecycle

use crate::package::PackageRollbackInfo;
use crate::VersionedPackage;
use chrono::{DateTime, Utc};
use rbk_errors::RollbackError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Identifier of the install session that performed a committed rollback
pub type SessionId = Uuid;

/// Current on-disk layout of [`RollbackRecord`]
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// Unique, monotonically assigned rollback identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollbackId(pub u64);

impl RollbackId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RollbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RollbackId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// One atomic rollback unit covering one or more packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub id: RollbackId,
    pub packages: Vec<PackageRollbackInfo>,
    #[serde(default)]
    pub is_staged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cause_packages: Vec<VersionedPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_session_id: Option<SessionId>,
}

impl RollbackInfo {
    /// Build a rollback unit, rejecting empty package sets and repeated names
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::InvalidRecord` if `packages` is empty or names
    /// the same package twice.
    pub fn new(
        id: RollbackId,
        packages: Vec<PackageRollbackInfo>,
        is_staged: bool,
        cause_packages: Vec<VersionedPackage>,
    ) -> Result<Self, RollbackError> {
        let info = Self {
            id,
            packages,
            is_staged,
            cause_packages,
            committed_session_id: None,
        };
        info.check()?;
        Ok(info)
    }

    /// Structural checks shared by construction and decoding
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::InvalidRecord` on an empty or duplicated
    /// package list.
    pub fn check(&self) -> Result<(), RollbackError> {
        if self.packages.is_empty() {
            return Err(RollbackError::InvalidRecord {
                message: format!("rollback {} covers no packages", self.id),
            });
        }
        let mut seen = HashSet::new();
        for package in &self.packages {
            if !seen.insert(package.package_name.as_str()) {
                return Err(RollbackError::InvalidRecord {
                    message: format!(
                        "rollback {} lists {} more than once",
                        self.id, package.package_name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Whether this rollback covers the named package
    #[must_use]
    pub fn covers(&self, package_name: &str) -> bool {
        self.package(package_name).is_some()
    }

    /// The entry for the named package, if covered
    #[must_use]
    pub fn package(&self, package_name: &str) -> Option<&PackageRollbackInfo> {
        self.packages
            .iter()
            .find(|p| p.package_name == package_name)
    }

    /// Names of all covered packages
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|p| p.package_name.as_str())
    }
}

/// Lifecycle state of a rollback entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackState {
    /// Tracking while the originating install session is still running
    Enabled,
    /// Committable until the lifetime elapses
    Available,
    /// Executed; kept for reporting while relevant
    Committed,
    /// Lifetime elapsed or explicitly expired
    Expired,
    /// Superseded by a newer install of a covered package
    Cancelled,
    /// Reversion took effect on some packages only; quarantined
    PartiallyApplied,
}

impl RollbackState {
    /// `Enabled` or `Available`: the entry still claims its packages
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Enabled | Self::Available)
    }

    /// No further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Enabled, Self::Available | Self::Expired | Self::Cancelled)
                | (
                    Self::Available,
                    Self::Committed | Self::Expired | Self::Cancelled | Self::PartiallyApplied
                )
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Available => "available",
            Self::Committed => "committed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::PartiallyApplied => "partially_applied",
        }
    }
}

impl fmt::Display for RollbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of a rollback entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub format_version: u32,
    pub info: RollbackInfo,
    pub state: RollbackState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl RollbackRecord {
    /// A freshly recorded `Enabled` entry
    #[must_use]
    pub fn enabled(info: RollbackInfo, created_at: DateTime<Utc>) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            info,
            state: RollbackState::Enabled,
            created_at,
            available_at: None,
            committed_at: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> RollbackId {
        self.info.id
    }

    /// Move to `next`, enforcing the lifecycle
    ///
    /// # Errors
    ///
    /// Returns `RollbackError::InvalidTransition` if the lifecycle does not
    /// allow the move.
    pub fn transition(&mut self, next: RollbackState) -> Result<(), RollbackError> {
        if !self.state.can_transition_to(next) {
            return Err(RollbackError::InvalidTransition {
                id: self.id().get(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}
