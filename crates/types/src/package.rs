//! Package identity and version codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic version code of an installed package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionCode(pub u64);

impl VersionCode {
    #[must_use]
    pub const fn new(code: u64) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VersionCode {
    fn from(code: u64) -> Self {
        Self(code)
    }
}

/// A package name paired with one of its version codes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedPackage {
    pub name: String,
    pub version: VersionCode,
}

impl VersionedPackage {
    pub fn new(name: impl Into<String>, version: impl Into<VersionCode>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for VersionedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// One package covered by a rollback: the version it is reverted from and the
/// version it is reverted to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRollbackInfo {
    pub package_name: String,
    pub version_rolled_back_from: VersionCode,
    pub version_rolled_back_to: VersionCode,
}

impl PackageRollbackInfo {
    pub fn new(
        package_name: impl Into<String>,
        from: impl Into<VersionCode>,
        to: impl Into<VersionCode>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            version_rolled_back_from: from.into(),
            version_rolled_back_to: to.into(),
        }
    }
}

impl fmt::Display for PackageRollbackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.package_name, self.version_rolled_back_from, self.version_rolled_back_to
        )
    }
}
