//! Rollback lifecycle manager

use crate::clock::Clock;
use crate::expiry::ExpirationPolicy;
use crate::query;
use crate::reverter::{PackageReverter, RevertError};
use crate::validator::{self, InstalledVersions, Validation, VersionWatermarks};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rbk_errors::{Error, RollbackError};
use rbk_events::{
    EventEmitter, EventSender, ExpiryReason, FailureContext, PruneReason, RollbackEvent,
    StoreEvent,
};
use rbk_store::{LoadReport, RecordStore};
use rbk_types::{
    CommitJournal, CommitStatus, JournalPhase, PackageRollbackInfo, RollbackId, RollbackInfo,
    RollbackRecord, RollbackState, SessionId, VersionCode, VersionedPackage,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::instrument;

/// Capabilities the manager consumes from the rest of the system
#[derive(Clone)]
pub struct Collaborators {
    pub installed: Arc<dyn InstalledVersions>,
    pub reverter: Arc<dyn PackageReverter>,
    pub clock: Arc<dyn Clock>,
}

/// A successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub rollback_id: RollbackId,
    pub session_id: SessionId,
    pub committed_at: DateTime<Utc>,
}

/// What a load from the store found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub records: usize,
    pub corrupt_records: usize,
    /// Interrupted commits resolved from their journals
    pub recovered: usize,
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Expire(ExpiryReason),
    Prune(PruneReason),
}

type EntryLocks = DashMap<RollbackId, Arc<Mutex<()>>>;

/// Held entry lock; the map slot is dropped with the last holder
struct EntryGuard<'a> {
    locks: &'a EntryLocks,
    id: RollbackId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // a count of one is the map's own handle: nobody holds or awaits it
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Owner of every rollback entry and its transitions
///
/// Records are persisted before they are published in memory. Each entry has
/// its own lock; `commit`, `mark_available`, expiry and cancellation of an id
/// serialize on it while unrelated ids proceed concurrently. The records map
/// is never locked across reverter or store I/O.
///
/// Lock order: registration, then entry locks, then records and watermarks.
pub struct RollbackManager {
    store: RecordStore,
    policy: ExpirationPolicy,
    installed: Arc<dyn InstalledVersions>,
    reverter: Arc<dyn PackageReverter>,
    clock: Arc<dyn Clock>,
    tx: Option<EventSender>,
    records: RwLock<BTreeMap<RollbackId, RollbackRecord>>,
    watermarks: Mutex<VersionWatermarks>,
    registration: Mutex<()>,
    entry_locks: EntryLocks,
}

impl EventEmitter for RollbackManager {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl RollbackManager {
    /// Load every entry from `store` and start managing them
    ///
    /// Interrupted commits are resolved from their journals before the
    /// manager is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a recovery write fails.
    pub async fn open(
        store: RecordStore,
        policy: ExpirationPolicy,
        collaborators: Collaborators,
        tx: Option<EventSender>,
    ) -> Result<Arc<Self>, Error> {
        let manager = Self {
            store,
            policy,
            installed: collaborators.installed,
            reverter: collaborators.reverter,
            clock: collaborators.clock,
            tx,
            records: RwLock::new(BTreeMap::new()),
            watermarks: Mutex::new(VersionWatermarks::new()),
            registration: Mutex::new(()),
            entry_locks: DashMap::new(),
        };
        manager.load().await?;
        Ok(Arc::new(manager))
    }

    #[must_use]
    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn entry_lock(&self, id: RollbackId) -> Arc<Mutex<()>> {
        Arc::clone(&*self.entry_locks.entry(id).or_default())
    }

    async fn lock_entry(&self, id: RollbackId) -> EntryGuard<'_> {
        let guard = self.entry_lock(id).lock_owned().await;
        EntryGuard {
            locks: &self.entry_locks,
            id,
            guard: Some(guard),
        }
    }

    fn try_lock_entry(&self, id: RollbackId) -> Option<EntryGuard<'_>> {
        let guard = self.entry_lock(id).try_lock_owned().ok()?;
        Some(EntryGuard {
            locks: &self.entry_locks,
            id,
            guard: Some(guard),
        })
    }

    /// Wait for every operation currently holding an entry lock
    async fn lock_all_entries(&self) -> Vec<EntryGuard<'_>> {
        let ids: Vec<RollbackId> = self.entry_locks.iter().map(|entry| *entry.key()).collect();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_entry(id).await);
        }
        guards
    }

    /// Number of entry locks currently held or awaited
    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.entry_locks.len()
    }

    async fn record(&self, id: RollbackId) -> Option<RollbackRecord> {
        self.records.read().await.get(&id).cloned()
    }

    async fn ids_where(&self, predicate: impl Fn(&RollbackRecord) -> bool) -> Vec<RollbackId> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| predicate(r))
            .map(RollbackRecord::id)
            .collect()
    }

    /// Write `record` to the store, then publish it in memory
    async fn persist(&self, record: RollbackRecord) -> Result<(), Error> {
        self.store.put(&record).await?;
        self.records.write().await.insert(record.id(), record);
        Ok(())
    }

    /// Rebuild in-memory state from the store exactly as a restart would
    ///
    /// Waits for in-flight commits to finish first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a recovery write fails.
    pub async fn reload(&self) -> Result<ReloadSummary, Error> {
        let _registration = self.registration.lock().await;
        let _entries = self.lock_all_entries().await;
        self.load().await
    }

    async fn load(&self) -> Result<ReloadSummary, Error> {
        let report = self.store.load_all().await?;
        self.report_store_repairs(&report);
        let LoadReport {
            records,
            journals,
            watermarks,
            corrupt,
            ..
        } = report;

        let mut loaded = BTreeMap::new();
        for record in records {
            if matches!(
                record.state,
                RollbackState::Expired | RollbackState::Cancelled
            ) {
                // retired before the crash; only the delete was lost
                self.store.delete(record.id()).await?;
                continue;
            }
            loaded.insert(record.id(), record);
        }

        let mut recovered = 0;
        for journal in journals {
            if self.recover(&mut loaded, journal).await? {
                recovered += 1;
            }
        }

        let summary = ReloadSummary {
            records: loaded.len(),
            corrupt_records: corrupt.len(),
            recovered,
        };
        *self.watermarks.lock().await = watermarks;
        *self.records.write().await = loaded;

        tracing::info!(
            records = summary.records,
            corrupt = summary.corrupt_records,
            recovered = summary.recovered,
            "rollback state loaded"
        );
        self.emit_rollback(RollbackEvent::Reloaded {
            records: summary.records,
            corrupt_records: summary.corrupt_records,
        });
        Ok(summary)
    }

    fn report_store_repairs(&self, report: &LoadReport) {
        for corrupt in &report.corrupt {
            self.emit_store(StoreEvent::RecordCorrupted {
                path: corrupt.path.clone(),
                quarantined_to: corrupt.quarantined_to.clone(),
                message: corrupt.error.to_string(),
            });
        }
        for path in &report.stray_temps {
            self.emit_store(StoreEvent::StrayTempRemoved { path: path.clone() });
        }
        if let Some((from, to)) = report.counter_repaired {
            self.emit_store(StoreEvent::CounterRepaired { from, to });
        }
    }

    /// Resolve one interrupted commit; returns whether the entry was affected
    async fn recover(
        &self,
        records: &mut BTreeMap<RollbackId, RollbackRecord>,
        journal: CommitJournal,
    ) -> Result<bool, Error> {
        let id = journal.rollback_id;
        let Some(record) = records.get_mut(&id) else {
            tracing::warn!(rollback_id = %id, "discarding commit journal of unknown rollback");
            self.store.remove_journal(id).await?;
            return Ok(false);
        };
        if record.state != RollbackState::Available {
            // the outcome was persisted; only the journal cleanup was lost
            self.store.remove_journal(id).await?;
            return Ok(false);
        }

        match journal.phase {
            JournalPhase::Staging => {
                if let Err(err) = self.reverter.abandon(journal.session_id).await {
                    tracing::warn!(
                        rollback_id = %id,
                        session = %journal.session_id,
                        error = %err,
                        "failed to abandon interrupted session"
                    );
                }
            }
            JournalPhase::Applying => {
                let mut quarantined = record.clone();
                quarantined.transition(RollbackState::PartiallyApplied)?;
                quarantined.failure = Some(format!(
                    "commit interrupted while applying (applied: {})",
                    applied_list(&journal.applied)
                ));
                self.store.put(&quarantined).await?;
                *record = quarantined;
            }
        }
        self.store.remove_journal(id).await?;

        self.emit_rollback(RollbackEvent::Recovered {
            rollback_id: id,
            phase: journal.phase,
            state: record.state,
        });
        Ok(true)
    }

    /// Record a rollback-enabled install as a new `Enabled` entry
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for an empty or repeated package list,
    /// `DuplicatePendingRollback` if a package already has a pending entry,
    /// or a storage error if the entry cannot be persisted.
    #[instrument(skip(self, packages, cause_packages), fields(packages = packages.len()))]
    pub async fn record_enabled_install(
        &self,
        packages: Vec<PackageRollbackInfo>,
        is_staged: bool,
        cause_packages: Vec<VersionedPackage>,
    ) -> Result<RollbackId, Error> {
        let _registration = self.registration.lock().await;

        let mut info = RollbackInfo::new(RollbackId(0), packages, is_staged, cause_packages)?;
        {
            let records = self.records.read().await;
            for package in info.package_names() {
                let existing = records
                    .values()
                    .find(|r| r.state.is_pending() && r.info.covers(package));
                if let Some(existing) = existing {
                    return Err(RollbackError::DuplicatePendingRollback {
                        package: package.to_string(),
                        existing: existing.id().get(),
                    }
                    .into());
                }
            }
        }

        info.id = self.store.allocate_id().await?;
        let id = info.id;
        let names: Vec<String> = info.package_names().map(str::to_string).collect();
        self.persist(RollbackRecord::enabled(info, self.clock.now()))
            .await?;
        self.clear_watermarks(&names).await?;

        tracing::info!(rollback_id = %id, packages = ?names, "rollback enabled");
        self.emit_rollback(RollbackEvent::Enabled {
            rollback_id: id,
            packages: names,
            is_staged,
        });
        Ok(id)
    }

    /// The originating install finished; `Enabled → Available`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `InvalidTransition` if the
    /// entry is not `Enabled`.
    pub async fn mark_available(&self, id: RollbackId) -> Result<(), Error> {
        let _guard = self.lock_entry(id).await;

        let mut record = self
            .record(id)
            .await
            .ok_or(RollbackError::NotFound { id: id.get() })?;
        record.transition(RollbackState::Available)?;
        record.available_at = Some(self.clock.now());
        self.persist(record).await?;

        tracing::info!(rollback_id = %id, "rollback available");
        self.emit_rollback(RollbackEvent::Available { rollback_id: id });
        Ok(())
    }

    /// Revert every package of an available rollback
    ///
    /// # Errors
    ///
    /// - `NotFound` unless `id` names an `Available`, unexpired entry
    /// - `InconsistentState` if installed versions no longer match; the entry
    ///   is untouched
    /// - `RevertFailed` if reversion failed before any package changed; the
    ///   entry stays `Available`
    /// - `PartialRollbackFailure` if some packages were reverted; the entry is
    ///   quarantined as `PartiallyApplied`
    #[instrument(skip(self), fields(rollback_id = %id))]
    pub async fn commit(&self, id: RollbackId) -> Result<CommitOutcome, Error> {
        let _guard = self.lock_entry(id).await;

        let result = self.commit_locked(id).await;
        if let Err(err) = &result {
            if !matches!(
                err.as_rollback(),
                Some(RollbackError::PartialRollbackFailure { .. })
            ) {
                self.emit_rollback(RollbackEvent::CommitFailed {
                    rollback_id: id,
                    failure: FailureContext::from_error(err),
                });
            }
        }
        result
    }

    /// Run [`RollbackManager::commit`] on a task and deliver its status
    pub fn commit_async(
        self: &Arc<Self>,
        id: RollbackId,
        status_tx: oneshot::Sender<CommitStatus>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let status = match manager.commit(id).await {
                Ok(_) => CommitStatus::succeeded(id),
                Err(err) => CommitStatus::failed(id, &err),
            };
            // the requester may have stopped waiting
            let _ = status_tx.send(status);
        })
    }

    async fn commit_locked(&self, id: RollbackId) -> Result<CommitOutcome, Error> {
        let now = self.clock.now();
        let record = match self.record(id).await {
            Some(r) if r.state == RollbackState::Available && !self.policy.is_expired(&r, now) => r,
            _ => return Err(RollbackError::NotFound { id: id.get() }.into()),
        };

        let validation = {
            let watermarks = self.watermarks.lock().await;
            validator::validate(&record.info, self.installed.as_ref(), &watermarks)
        };
        if let Validation::Mismatch(mismatches) = &validation {
            self.emit_rollback(RollbackEvent::ValidationFailed {
                rollback_id: id,
                mismatches: mismatches.iter().map(ToString::to_string).collect(),
            });
        }
        if let Some(err) = validation.into_error(id) {
            return Err(err.into());
        }

        let started = Instant::now();
        let session = self
            .reverter
            .open_session(&record.info)
            .await
            .map_err(|e| revert_failed(id, &e))?;
        self.emit_rollback(RollbackEvent::CommitStarted {
            rollback_id: id,
            session_id: session,
            packages: record.info.packages.len(),
        });

        // Phase 1: stage everything; nothing observable changes yet
        let mut journal = CommitJournal::staging(id, session, now);
        if let Err(err) = self.store.write_journal(&journal).await {
            self.abandon(id, session).await;
            return Err(err);
        }
        for package in &record.info.packages {
            if let Err(e) = self.reverter.stage(session, package).await {
                self.abandon(id, session).await;
                self.store.remove_journal(id).await?;
                return Err(revert_failed(id, &e));
            }
        }

        // Phase 2: apply
        journal.phase = JournalPhase::Applying;
        if let Err(err) = self.store.write_journal(&journal).await {
            self.abandon(id, session).await;
            self.store.remove_journal(id).await?;
            return Err(err);
        }
        let packages = record.info.packages.clone();
        for package in &packages {
            if let Err(e) = self.reverter.apply(session, package).await {
                if journal.applied.is_empty() {
                    self.abandon(id, session).await;
                    self.store.remove_journal(id).await?;
                    return Err(revert_failed(id, &e));
                }
                let failed = Some(package.package_name.as_str());
                return Err(self.quarantine(record, &journal, failed, e.to_string()).await);
            }
            journal.applied.push(package.package_name.clone());
            if let Err(err) = self.store.write_journal(&journal).await {
                // the Applying phase alone already forces quarantine on recovery
                tracing::warn!(rollback_id = %id, error = %err, "failed to record apply progress");
            }
        }

        let mut committed = record.clone();
        committed.transition(RollbackState::Committed)?;
        let committed_at = self.clock.now();
        committed.committed_at = Some(committed_at);
        committed.info.committed_session_id = Some(session);
        let names: Vec<String> = committed.info.package_names().map(str::to_string).collect();
        if let Err(err) = self.store.put(&committed).await {
            // every package is reverted but the entry cannot say so
            let message = format!("committed state could not be persisted: {err}");
            return Err(self.quarantine(record, &journal, None, message).await);
        }
        self.records.write().await.insert(id, committed);

        if let Err(err) = self.store.remove_journal(id).await {
            tracing::warn!(rollback_id = %id, error = %err, "failed to remove commit journal");
        }
        if let Err(err) = self.clear_watermarks(&names).await {
            tracing::warn!(rollback_id = %id, error = %err, "failed to clear version watermarks");
        }

        tracing::info!(rollback_id = %id, session = %session, "rollback committed");
        self.emit_rollback(RollbackEvent::Committed {
            rollback_id: id,
            session_id: session,
            duration: started.elapsed(),
        });
        Ok(CommitOutcome {
            rollback_id: id,
            session_id: session,
            committed_at,
        })
    }

    async fn abandon(&self, id: RollbackId, session: SessionId) {
        if let Err(err) = self.reverter.abandon(session).await {
            tracing::warn!(
                rollback_id = %id,
                session = %session,
                error = %err,
                "failed to abandon reversion session"
            );
        }
    }

    /// Mark a partially reverted entry `PartiallyApplied`
    async fn quarantine(
        &self,
        mut record: RollbackRecord,
        journal: &CommitJournal,
        failed_package: Option<&str>,
        message: String,
    ) -> Error {
        let id = record.id();
        let applied = applied_list(&journal.applied);
        if let Err(err) = record.transition(RollbackState::PartiallyApplied) {
            return err.into();
        }
        record.failure = Some(format!("applied {applied}; {message}"));

        match self.store.put(&record).await {
            Ok(()) => {
                if let Err(err) = self.store.remove_journal(id).await {
                    tracing::warn!(rollback_id = %id, error = %err, "failed to remove commit journal");
                }
            }
            Err(err) => tracing::error!(
                rollback_id = %id,
                error = %err,
                "failed to persist quarantine; the journal will quarantine it on load"
            ),
        }
        self.records.write().await.insert(id, record);

        self.emit_rollback(RollbackEvent::PartiallyApplied {
            rollback_id: id,
            applied: journal.applied.clone(),
            failed_package: failed_package.map(str::to_string),
            error: message.clone(),
        });
        RollbackError::PartialRollbackFailure {
            id: id.get(),
            applied,
            message,
        }
        .into()
    }

    /// Expire and prune everything the policy says is due at the current time
    ///
    /// # Errors
    ///
    /// Returns an error if a retired entry cannot be persisted or deleted.
    pub async fn sweep(&self) -> Result<Vec<RollbackId>, Error> {
        self.sweep_at(self.clock.now()).await
    }

    /// Expire and prune everything due at `now`; returns the removed ids
    ///
    /// Entries with a commit in flight are skipped and re-checked next time.
    ///
    /// # Errors
    ///
    /// Returns an error if a retired entry cannot be persisted or deleted.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<RollbackId>, Error> {
        let candidates: Vec<RollbackId> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| self.due_removal(r, now).is_some())
                .map(RollbackRecord::id)
                .collect()
        };

        let mut removed = Vec::new();
        let (mut expired, mut pruned) = (0, 0);
        for id in candidates {
            let Some(_guard) = self.try_lock_entry(id) else {
                tracing::debug!(rollback_id = %id, "skipping rollback with a commit in flight");
                continue;
            };
            let Some(record) = self.record(id).await else {
                continue;
            };
            match self.due_removal(&record, now) {
                Some(Removal::Expire(reason)) => {
                    self.retire(
                        record,
                        RollbackState::Expired,
                        RollbackEvent::Expired {
                            rollback_id: id,
                            reason,
                        },
                    )
                    .await?;
                    expired += 1;
                }
                Some(Removal::Prune(reason)) => {
                    self.prune(record, reason).await?;
                    pruned += 1;
                }
                None => continue,
            }
            removed.push(id);
        }

        self.emit_rollback(RollbackEvent::SweepCompleted { expired, pruned });
        Ok(removed)
    }

    fn due_removal(&self, record: &RollbackRecord, now: DateTime<Utc>) -> Option<Removal> {
        if self.policy.is_expired(record, now) {
            return Some(Removal::Expire(ExpiryReason::LifetimeElapsed));
        }
        self.policy
            .prune_reason(record, Some(self.installed.as_ref()), now)
            .map(Removal::Prune)
    }

    /// Move a pending entry to a terminal state, announce it, then delete it
    async fn retire(
        &self,
        mut record: RollbackRecord,
        next: RollbackState,
        event: RollbackEvent,
    ) -> Result<(), Error> {
        let id = record.id();
        record.transition(next)?;
        self.store.put(&record).await?;
        self.records.write().await.remove(&id);
        tracing::info!(rollback_id = %id, state = %next, "rollback retired");
        self.emit_rollback(event);
        self.store.delete(id).await?;
        Ok(())
    }

    async fn prune(&self, record: RollbackRecord, reason: PruneReason) -> Result<(), Error> {
        let id = record.id();
        self.records.write().await.remove(&id);
        tracing::info!(rollback_id = %id, ?reason, "committed rollback pruned");
        self.emit_rollback(RollbackEvent::Pruned {
            rollback_id: id,
            reason,
        });
        self.store.delete(id).await?;
        Ok(())
    }

    /// Expire every pending entry covering `package`, regardless of age
    ///
    /// # Errors
    ///
    /// Returns an error if a retired entry cannot be persisted or deleted.
    pub async fn expire_for_package(&self, package: &str) -> Result<Vec<RollbackId>, Error> {
        self.retire_pending(package, RollbackState::Expired, |id| RollbackEvent::Expired {
            rollback_id: id,
            reason: ExpiryReason::PackageExpired,
        })
        .await
    }

    /// Cancel every pending entry covering `package`
    ///
    /// Used when a newer install supersedes the rollback.
    ///
    /// # Errors
    ///
    /// Returns an error if a cancelled entry cannot be persisted or deleted.
    pub async fn cancel_for_package(&self, package: &str) -> Result<Vec<RollbackId>, Error> {
        self.retire_pending(package, RollbackState::Cancelled, |id| RollbackEvent::Cancelled {
            rollback_id: id,
            package: package.to_string(),
        })
        .await
    }

    async fn retire_pending(
        &self,
        package: &str,
        next: RollbackState,
        event: impl Fn(RollbackId) -> RollbackEvent,
    ) -> Result<Vec<RollbackId>, Error> {
        let ids = self
            .ids_where(|r| r.state.is_pending() && r.info.covers(package))
            .await;

        let mut retired = Vec::new();
        for id in ids {
            let _guard = self.lock_entry(id).await;
            let Some(record) = self.record(id).await else {
                continue;
            };
            if !(record.state.is_pending() && record.info.covers(package)) {
                continue;
            }
            self.retire(record, next, event(id)).await?;
            retired.push(id);
        }
        Ok(retired)
    }

    async fn prune_committed(
        &self,
        package: &str,
        reason: PruneReason,
        applies: impl Fn(&PackageRollbackInfo) -> bool,
    ) -> Result<Vec<RollbackId>, Error> {
        let affected = |r: &RollbackRecord| {
            r.state == RollbackState::Committed && r.info.package(package).is_some_and(&applies)
        };
        let ids = self.ids_where(affected).await;

        let mut pruned = Vec::new();
        for id in ids {
            let _guard = self.lock_entry(id).await;
            match self.record(id).await {
                Some(record) if affected(&record) => {
                    self.prune(record, reason).await?;
                    pruned.push(id);
                }
                _ => {}
            }
        }
        Ok(pruned)
    }

    /// The install subsystem installed `version` of `package`
    ///
    /// With rollback enabled the install supersedes pending entries for the
    /// package, which are cancelled. Without it pending entries are kept (they
    /// now fail validation), the package watermark is raised and committed
    /// history that the new version makes irrelevant is pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if a transition or the watermark cannot be persisted.
    pub async fn on_package_installed(
        &self,
        package: &str,
        version: VersionCode,
        rollback_enabled: bool,
    ) -> Result<(), Error> {
        if rollback_enabled {
            self.cancel_for_package(package).await?;
            return Ok(());
        }

        let tracked = !self
            .ids_where(|r| r.state.is_pending() && r.info.covers(package))
            .await
            .is_empty();
        if tracked {
            self.raise_watermark(package, version).await?;
        }

        self.prune_committed(package, PruneReason::UpgradedPastRolledBackVersion, |p| {
            version > p.version_rolled_back_from
        })
        .await?;
        Ok(())
    }

    /// The install subsystem removed `package`
    ///
    /// # Errors
    ///
    /// Returns an error if a transition or the watermarks cannot be persisted.
    pub async fn on_package_uninstalled(&self, package: &str) -> Result<(), Error> {
        self.retire_pending(package, RollbackState::Expired, |id| RollbackEvent::Expired {
            rollback_id: id,
            reason: ExpiryReason::PackageUninstalled,
        })
        .await?;
        self.prune_committed(package, PruneReason::PackageUninstalled, |_| true)
            .await?;
        self.clear_watermarks(&[package.to_string()]).await
    }

    async fn raise_watermark(&self, package: &str, version: VersionCode) -> Result<(), Error> {
        let mut watermarks = self.watermarks.lock().await;
        let current = watermarks.get(package).copied();
        if current.is_some_and(|v| v >= version) {
            return Ok(());
        }
        watermarks.insert(package.to_string(), version);
        self.store.save_watermarks(&watermarks).await?;
        tracing::debug!(package, %version, "version watermark raised");
        Ok(())
    }

    async fn clear_watermarks(&self, packages: &[String]) -> Result<(), Error> {
        let mut watermarks = self.watermarks.lock().await;
        let before = watermarks.len();
        for package in packages {
            watermarks.remove(package);
        }
        if watermarks.len() != before {
            self.store.save_watermarks(&watermarks).await?;
        }
        Ok(())
    }

    /// Current watermark of `package`, if one is tracked
    pub async fn watermark(&self, package: &str) -> Option<VersionCode> {
        self.watermarks.lock().await.get(package).copied()
    }

    /// Available, unexpired rollbacks ordered by id
    pub async fn get_available_rollbacks(&self) -> Vec<RollbackInfo> {
        let now = self.clock.now();
        let records = self.records.read().await;
        query::available(records.values(), &self.policy, now)
    }

    /// Committed rollbacks that are still relevant, ordered by id
    pub async fn get_recently_committed_rollbacks(&self) -> Vec<RollbackInfo> {
        let now = self.clock.now();
        let records = self.records.read().await;
        query::recently_committed(
            records.values(),
            &self.policy,
            Some(self.installed.as_ref()),
            now,
        )
    }

    /// Any entry the manager holds, in whatever state
    pub async fn get_rollback(&self, id: RollbackId) -> Option<RollbackRecord> {
        self.record(id).await
    }

    /// Entries quarantined after a partial reversion
    pub async fn quarantined_rollbacks(&self) -> Vec<RollbackRecord> {
        query::quarantined(self.records.read().await.values())
    }

    /// Operator acknowledgement of a quarantined entry; deletes it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `InvalidTransition` if the
    /// entry is not `PartiallyApplied`.
    pub async fn clear_quarantined(&self, id: RollbackId) -> Result<(), Error> {
        let _guard = self.lock_entry(id).await;

        let record = self
            .record(id)
            .await
            .ok_or(RollbackError::NotFound { id: id.get() })?;
        if record.state != RollbackState::PartiallyApplied {
            return Err(RollbackError::InvalidTransition {
                id: id.get(),
                from: record.state.to_string(),
                to: "cleared".to_string(),
            }
            .into());
        }

        self.store.delete(id).await?;
        self.records.write().await.remove(&id);
        tracing::info!(rollback_id = %id, "quarantined rollback cleared");
        self.emit_rollback(RollbackEvent::QuarantineCleared { rollback_id: id });
        Ok(())
    }

    /// Sweep on a timer until the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(err) = manager.sweep().await {
                    manager.emit_operation_failed("expiration sweep", err.to_string());
                }
            }
        })
    }
}

fn revert_failed(id: RollbackId, err: &RevertError) -> Error {
    RollbackError::RevertFailed {
        id: id.get(),
        message: err.to_string(),
    }
    .into()
}

fn applied_list(applied: &[String]) -> String {
    if applied.is_empty() {
        "none".to_string()
    } else {
        applied.join(", ")
    }
}
