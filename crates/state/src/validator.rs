//! Consistency checks between a rollback and the installed packages

use rbk_errors::RollbackError;
use rbk_types::{RollbackId, RollbackInfo, VersionCode};
use std::collections::BTreeMap;
use std::fmt;

/// Read-only view of what is installed right now
pub trait InstalledVersions: Send + Sync {
    /// Installed version code of `package`, or `None` if it is not installed
    fn current_version(&self, package: &str) -> Option<VersionCode>;
}

impl InstalledVersions for BTreeMap<String, VersionCode> {
    fn current_version(&self, package: &str) -> Option<VersionCode> {
        self.get(package).copied()
    }
}

/// Highest version code installed without rollback, per package
pub type VersionWatermarks = rbk_store::Watermarks;

/// One reason a rollback no longer matches the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    NotInstalled {
        package: String,
    },
    VersionChanged {
        package: String,
        expected: VersionCode,
        installed: VersionCode,
    },
    /// A newer version was accepted without rollback after this one was recorded
    WatermarkExceeded {
        package: String,
        rolled_back_from: VersionCode,
        watermark: VersionCode,
    },
}

impl Mismatch {
    #[must_use]
    pub fn package(&self) -> &str {
        match self {
            Self::NotInstalled { package }
            | Self::VersionChanged { package, .. }
            | Self::WatermarkExceeded { package, .. } => package,
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled { package } => write!(f, "{package}: not installed"),
            Self::VersionChanged {
                package,
                expected,
                installed,
            } => write!(f, "{package}: expected {expected}, installed {installed}"),
            Self::WatermarkExceeded {
                package,
                rolled_back_from,
                watermark,
            } => write!(
                f,
                "{package}: {watermark} was installed without rollback after {rolled_back_from}"
            ),
        }
    }
}

/// Outcome of [`validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Mismatch(Vec<Mismatch>),
}

impl Validation {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The `InconsistentState` error for a failed validation
    #[must_use]
    pub fn into_error(self, id: RollbackId) -> Option<RollbackError> {
        match self {
            Self::Ok => None,
            Self::Mismatch(mismatches) => Some(RollbackError::InconsistentState {
                id: id.get(),
                details: mismatches
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }
}

/// Check every package of `info` against the live versions and watermarks
///
/// All packages are checked; every mismatch found is reported.
pub fn validate(
    info: &RollbackInfo,
    live: &dyn InstalledVersions,
    watermarks: &VersionWatermarks,
) -> Validation {
    let mut mismatches = Vec::new();
    for package in &info.packages {
        let name = &package.package_name;
        let from = package.version_rolled_back_from;
        match live.current_version(name) {
            None => mismatches.push(Mismatch::NotInstalled {
                package: name.clone(),
            }),
            Some(installed) if installed != from => mismatches.push(Mismatch::VersionChanged {
                package: name.clone(),
                expected: from,
                installed,
            }),
            Some(_) => {}
        }
        if let Some(&watermark) = watermarks.get(name) {
            if watermark > from {
                mismatches.push(Mismatch::WatermarkExceeded {
                    package: name.clone(),
                    rolled_back_from: from,
                    watermark,
                });
            }
        }
    }

    if mismatches.is_empty() {
        Validation::Ok
    } else {
        Validation::Mismatch(mismatches)
    }
}
