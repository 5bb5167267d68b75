//! Filters over record snapshots
//!
//! These operate on any slice of records, whether it came from the live
//! manager or straight from the store.

use crate::expiry::ExpirationPolicy;
use crate::validator::InstalledVersions;
use chrono::{DateTime, Utc};
use rbk_types::{RollbackInfo, RollbackRecord, RollbackState};

/// `Available` entries that have not expired at `now`, ordered by id
pub fn available<'a>(
    records: impl IntoIterator<Item = &'a RollbackRecord>,
    policy: &ExpirationPolicy,
    now: DateTime<Utc>,
) -> Vec<RollbackInfo> {
    let mut infos: Vec<_> = records
        .into_iter()
        .filter(|r| r.state == RollbackState::Available && !policy.is_expired(r, now))
        .map(|r| r.info.clone())
        .collect();
    infos.sort_by_key(|info| info.id);
    infos
}

/// `Committed` entries that are still relevant, ordered by id
pub fn recently_committed<'a>(
    records: impl IntoIterator<Item = &'a RollbackRecord>,
    policy: &ExpirationPolicy,
    live: Option<&dyn InstalledVersions>,
    now: DateTime<Utc>,
) -> Vec<RollbackInfo> {
    let mut infos: Vec<_> = records
        .into_iter()
        .filter(|r| {
            r.state == RollbackState::Committed && policy.prune_reason(r, live, now).is_none()
        })
        .map(|r| r.info.clone())
        .collect();
    infos.sort_by_key(|info| info.id);
    infos
}

/// Entries quarantined after a partial reversion
pub fn quarantined<'a>(records: impl IntoIterator<Item = &'a RollbackRecord>) -> Vec<RollbackRecord> {
    let mut found: Vec<_> = records
        .into_iter()
        .filter(|r| r.state == RollbackState::PartiallyApplied)
        .cloned()
        .collect();
    found.sort_by_key(RollbackRecord::id);
    found
}
