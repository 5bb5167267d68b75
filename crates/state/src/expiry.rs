//! Expiration and relevance policy
//!
//! Every decision here is a pure function of a record, the current time and
//! (for relevance) the installed versions. The sweeper, the queries and
//! `commit` all consult the same [`ExpirationPolicy`], so an entry that is
//! past its lifetime is treated as expired everywhere even before a sweep
//! deletes it.

use crate::validator::InstalledVersions;
use chrono::{DateTime, Duration, Utc};
use rbk_config::RollbackConfig;
use rbk_events::PruneReason;
use rbk_types::{RollbackRecord, RollbackState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// How long an `Available` entry stays committable, measured from `created_at`
    pub lifetime: Duration,
    /// How long a `Committed` entry stays in history, measured from `committed_at`
    pub committed_retention: Duration,
}

impl ExpirationPolicy {
    #[must_use]
    pub fn new(lifetime: std::time::Duration, committed_retention: std::time::Duration) -> Self {
        Self {
            lifetime: to_chrono(lifetime),
            committed_retention: to_chrono(committed_retention),
        }
    }

    #[must_use]
    pub fn from_config(config: &RollbackConfig) -> Self {
        Self::new(config.lifetime(), config.committed_retention())
    }

    /// An `Available` entry whose lifetime has elapsed
    ///
    /// `Enabled` entries never expire by time; their install is still running.
    #[must_use]
    pub fn is_expired(&self, record: &RollbackRecord, now: DateTime<Utc>) -> bool {
        record.state == RollbackState::Available && now - record.created_at > self.lifetime
    }

    /// Why a `Committed` entry should leave history, if it should
    ///
    /// With `live` set, an entry is dropped once any covered package is
    /// uninstalled or sits above the version it was rolled back from.
    /// Without it only the retention bound applies.
    #[must_use]
    pub fn prune_reason(
        &self,
        record: &RollbackRecord,
        live: Option<&dyn InstalledVersions>,
        now: DateTime<Utc>,
    ) -> Option<PruneReason> {
        if record.state != RollbackState::Committed {
            return None;
        }
        if let Some(live) = live {
            for package in &record.info.packages {
                match live.current_version(&package.package_name) {
                    None => return Some(PruneReason::PackageUninstalled),
                    Some(v) if v > package.version_rolled_back_from => {
                        return Some(PruneReason::UpgradedPastRolledBackVersion)
                    }
                    Some(_) => {}
                }
            }
        }
        let committed_at = record.committed_at.unwrap_or(record.created_at);
        (now - committed_at > self.committed_retention).then_some(PruneReason::RetentionElapsed)
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::from_config(&RollbackConfig::default())
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
