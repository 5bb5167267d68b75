//! Lifecycle scenarios against a real store and fake collaborators

mod common;

use common::{pkg, Harness};
use rbk_errors::{Error, RollbackError};
use rbk_events::{AppEvent, ExpiryReason, PruneReason, RollbackEvent};
use rbk_state::{Clock, RollbackService};
use rbk_store::StateFilter;
use rbk_types::{CommitFailureReason, RollbackId, RollbackState, VersionCode, VersionedPackage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn rollback_err(err: &Error) -> &RollbackError {
    err.as_rollback().expect("rollback error")
}

async fn enable_available(h: &Harness, name: &str, from: u64, to: u64) -> RollbackId {
    h.installed.set(name, from);
    let id = h
        .manager
        .record_enabled_install(vec![pkg(name, from, to)], false, Vec::new())
        .await
        .unwrap();
    h.manager.mark_available(id).await.unwrap();
    id
}

#[tokio::test]
async fn test_commit_then_second_commit_not_found() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    let outcome = h.manager.commit(id).await.unwrap();
    assert_eq!(outcome.rollback_id, id);

    let record = h.manager.get_rollback(id).await.unwrap();
    assert_eq!(record.state, RollbackState::Committed);
    assert_eq!(record.info.committed_session_id, Some(outcome.session_id));
    assert!(record.committed_at.is_some());

    let committed = h.manager.get_recently_committed_rollbacks().await;
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].id, id);
    assert!(h.manager.get_available_rollbacks().await.is_empty());
    assert_eq!(h.reverter.applied(), vec!["app".to_string()]);

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(rollback_err(&err), RollbackError::NotFound { .. }));
}

#[tokio::test]
async fn test_upgrade_without_rollback_makes_commit_inconsistent() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    h.installed.set("app", 4);
    h.manager
        .on_package_installed("app", VersionCode(4), false)
        .await
        .unwrap();

    // still listed; the mismatch only shows at commit time
    assert_eq!(h.manager.get_available_rollbacks().await.len(), 1);

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::InconsistentState { .. }
    ));
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::Available
    );
    assert!(h.reverter.applied().is_empty());
}

#[tokio::test]
async fn test_watermark_survives_downgrade_back() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    h.installed.set("app", 4);
    h.manager
        .on_package_installed("app", VersionCode(4), false)
        .await
        .unwrap();
    h.installed.set("app", 3);
    h.manager
        .on_package_installed("app", VersionCode(3), false)
        .await
        .unwrap();
    assert_eq!(h.manager.watermark("app").await, Some(VersionCode(4)));

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(err.to_string().contains("installed without rollback"));
}

#[tokio::test]
async fn test_commit_with_wrong_live_version_leaves_entry_available() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    h.installed.remove("app");

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::InconsistentState { .. }
    ));
    assert_eq!(h.manager.get_available_rollbacks().await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_pending_rejected() {
    let h = Harness::new().await;
    let first = h
        .manager
        .record_enabled_install(vec![pkg("app", 3, 2)], false, Vec::new())
        .await
        .unwrap();

    let err = h
        .manager
        .record_enabled_install(
            vec![pkg("lib", 5, 4), pkg("app", 3, 2)],
            true,
            vec![VersionedPackage::new("lib", 5)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::DuplicatePendingRollback { existing, .. } if *existing == first.get()
    ));

    let err = h
        .manager
        .record_enabled_install(Vec::new(), false, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::InvalidRecord { .. }
    ));
}

#[tokio::test]
async fn test_new_install_allowed_after_commit() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    h.manager.commit(id).await.unwrap();

    let next = h
        .manager
        .record_enabled_install(vec![pkg("app", 2, 1)], false, Vec::new())
        .await
        .unwrap();
    assert!(next > id);
}

#[tokio::test]
async fn test_mark_available_errors() {
    let h = Harness::new().await;
    let err = h.manager.mark_available(RollbackId(42)).await.unwrap_err();
    assert!(matches!(rollback_err(&err), RollbackError::NotFound { .. }));

    let id = enable_available(&h, "app", 3, 2).await;
    let err = h.manager.mark_available(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::InvalidTransition { .. }
    ));
}

#[tokio::test]
async fn test_enabled_entry_is_not_committable() {
    let h = Harness::new().await;
    h.installed.set("app", 3);
    let id = h
        .manager
        .record_enabled_install(vec![pkg("app", 3, 2)], true, Vec::new())
        .await
        .unwrap();

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(rollback_err(&err), RollbackError::NotFound { .. }));
    assert!(h.manager.get_available_rollbacks().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_commits_exactly_one_succeeds() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.commit(id).await })
    };
    let second = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.commit(id).await })
    };
    let (first, second) = futures::future::join(first, second).await;
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        rollback_err(failure),
        RollbackError::NotFound { .. }
    ));
    assert_eq!(h.reverter.applied(), vec!["app".to_string()]);
}

#[tokio::test]
async fn test_expired_entry_hidden_before_sweep() {
    let mut h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    h.clock.advance(chrono::Duration::days(14) + chrono::Duration::seconds(1));
    assert!(h.manager.get_available_rollbacks().await.is_empty());
    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(rollback_err(&err), RollbackError::NotFound { .. }));

    // still on disk until the sweep runs
    assert!(h.manager.store().get(id).await.unwrap().is_some());

    let removed = h.manager.sweep().await.unwrap();
    assert_eq!(removed, vec![id]);
    assert!(h.manager.get_rollback(id).await.is_none());
    assert!(h.manager.store().get(id).await.unwrap().is_none());

    let expired = h.drain_events().into_iter().any(|e| {
        matches!(
            e,
            AppEvent::Rollback(RollbackEvent::Expired {
                rollback_id,
                reason: ExpiryReason::LifetimeElapsed,
            }) if rollback_id == id
        )
    });
    assert!(expired);
}

#[tokio::test]
async fn test_enabled_entry_not_time_expired() {
    let h = Harness::new().await;
    let id = h
        .manager
        .record_enabled_install(vec![pkg("app", 3, 2)], true, Vec::new())
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::days(60));
    assert!(h.manager.sweep().await.unwrap().is_empty());
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::Enabled
    );
}

#[tokio::test]
async fn test_committed_dropped_after_upgrade_past_from() {
    let mut h = Harness::new().await;
    let id = enable_available(&h, "p", 5, 4).await;
    h.manager.commit(id).await.unwrap();
    assert_eq!(h.manager.get_recently_committed_rollbacks().await.len(), 1);

    h.installed.set("p", 7);
    // hidden as soon as the live version moves past 5
    assert!(h.manager.get_recently_committed_rollbacks().await.is_empty());

    h.manager
        .on_package_installed("p", VersionCode(7), false)
        .await
        .unwrap();
    assert!(h.manager.get_rollback(id).await.is_none());
    let pruned = h.drain_events().into_iter().any(|e| {
        matches!(
            e,
            AppEvent::Rollback(RollbackEvent::Pruned {
                reason: PruneReason::UpgradedPastRolledBackVersion,
                ..
            })
        )
    });
    assert!(pruned);
}

#[tokio::test]
async fn test_committed_retention_bound() {
    let h = Harness::new().await;
    let id = enable_available(&h, "p", 5, 4).await;
    h.manager.commit(id).await.unwrap();

    h.clock.advance(chrono::Duration::days(31));
    assert!(h.manager.get_recently_committed_rollbacks().await.is_empty());
    assert_eq!(h.manager.sweep().await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_rollback_enabled_install_cancels_pending() {
    let mut h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    h.manager
        .on_package_installed("app", VersionCode(4), true)
        .await
        .unwrap();
    assert!(h.manager.get_rollback(id).await.is_none());
    assert!(h.manager.store().get(id).await.unwrap().is_none());

    let cancelled = h.drain_events().into_iter().any(|e| {
        matches!(e, AppEvent::Rollback(RollbackEvent::Cancelled { rollback_id, .. }) if rollback_id == id)
    });
    assert!(cancelled);

    // the package is free for the new install's rollback
    h.manager
        .record_enabled_install(vec![pkg("app", 4, 3)], false, Vec::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_uninstall_expires_pending_and_prunes_committed() {
    let h = Harness::new().await;
    let committed = enable_available(&h, "a", 2, 1).await;
    h.manager.commit(committed).await.unwrap();
    let pending = enable_available(&h, "b", 9, 8).await;
    let other = enable_available(&h, "c", 4, 3).await;

    h.manager.on_package_uninstalled("a").await.unwrap();
    h.manager.on_package_uninstalled("b").await.unwrap();

    assert!(h.manager.get_rollback(committed).await.is_none());
    assert!(h.manager.get_rollback(pending).await.is_none());
    let available: Vec<_> = h
        .manager
        .get_available_rollbacks()
        .await
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(available, vec![other]);
}

#[tokio::test]
async fn test_expire_for_package() {
    let h = Harness::new().await;
    let a = enable_available(&h, "a", 2, 1).await;
    let b = enable_available(&h, "b", 2, 1).await;

    assert_eq!(h.manager.expire_for_package("a").await.unwrap(), vec![a]);
    assert!(h.manager.expire_for_package("a").await.unwrap().is_empty());
    let ids: Vec<_> = h
        .manager
        .get_available_rollbacks()
        .await
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec![b]);
}

#[tokio::test]
async fn test_stage_failure_leaves_entry_available() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    h.reverter.fail_stage("app");

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::RevertFailed { .. }
    ));
    assert_eq!(h.reverter.abandoned().len(), 1);
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::Available
    );
    assert!(h.manager.store().load_all().await.unwrap().journals.is_empty());
}

#[tokio::test]
async fn test_first_apply_failure_leaves_entry_available() {
    let h = Harness::new().await;
    h.installed.set("a", 2);
    h.installed.set("b", 7);
    let id = h
        .manager
        .record_enabled_install(vec![pkg("a", 2, 1), pkg("b", 7, 6)], false, Vec::new())
        .await
        .unwrap();
    h.manager.mark_available(id).await.unwrap();
    h.reverter.fail_apply("a");

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::RevertFailed { .. }
    ));
    assert_eq!(h.reverter.abandoned().len(), 1);
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::Available
    );
}

#[tokio::test]
async fn test_partial_apply_quarantines_entry() {
    let mut h = Harness::new().await;
    h.installed.set("a", 2);
    h.installed.set("b", 7);
    let id = h
        .manager
        .record_enabled_install(vec![pkg("a", 2, 1), pkg("b", 7, 6)], false, Vec::new())
        .await
        .unwrap();
    h.manager.mark_available(id).await.unwrap();
    h.reverter.fail_apply("b");

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::PartialRollbackFailure { .. }
    ));

    let quarantined = h.manager.quarantined_rollbacks().await;
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].state, RollbackState::PartiallyApplied);
    assert!(quarantined[0].failure.is_some());
    assert!(h.manager.get_available_rollbacks().await.is_empty());

    let partial = h.drain_events().into_iter().any(|e| {
        matches!(
            e,
            AppEvent::Rollback(RollbackEvent::PartiallyApplied { ref applied, .. })
                if applied == &vec!["a".to_string()]
        )
    });
    assert!(partial);

    // survives a restart, then the operator clears it
    h.restart().await;
    assert_eq!(h.manager.quarantined_rollbacks().await.len(), 1);
    h.manager.clear_quarantined(id).await.unwrap();
    assert!(h.manager.get_rollback(id).await.is_none());
    assert!(h.manager.store().get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unpersisted_commit_is_quarantined() {
    let mut h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    let record_path = h.dir.path().join("rollbacks").join(format!("{id}.json"));
    let saved = std::fs::read(&record_path).unwrap();
    h.reverter.corrupt_on_apply(record_path.clone());

    let err = h.manager.commit(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::PartialRollbackFailure { .. }
    ));
    assert_eq!(h.reverter.applied(), vec!["app".to_string()]);
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::PartiallyApplied
    );
    assert!(h.manager.get_available_rollbacks().await.is_empty());
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, AppEvent::Rollback(RollbackEvent::Committed { .. }))));

    // memory and disk agree once the record file is readable again
    std::fs::remove_dir(&record_path).unwrap();
    std::fs::write(&record_path, saved).unwrap();
    h.restart().await;
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::PartiallyApplied
    );
    assert!(h.manager.get_available_rollbacks().await.is_empty());
}

#[tokio::test]
async fn test_sweep_skips_entry_mid_commit() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    let gate = Arc::new(Notify::new());
    h.reverter.hold_stage(Arc::clone(&gate));

    let manager = Arc::clone(&h.manager);
    let commit = tokio::spawn(async move { manager.commit(id).await });
    h.reverter.stage_entered.notified().await;

    let removed = h
        .manager
        .sweep_at(h.clock.now() + chrono::Duration::days(15))
        .await
        .unwrap();
    assert!(removed.is_empty());
    assert!(h.manager.store().get(id).await.unwrap().is_some());

    gate.notify_one();
    let outcome = commit.await.unwrap().unwrap();
    assert_eq!(outcome.rollback_id, id);
    assert_eq!(
        h.manager.get_rollback(id).await.unwrap().state,
        RollbackState::Committed
    );
}

#[tokio::test]
async fn test_sweeper_removes_expired_entry() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    tokio::time::pause();

    h.clock.advance(chrono::Duration::days(15));
    let sweeper = h.manager.spawn_sweeper(Duration::from_secs(60));
    for _ in 0..10 {
        if h.manager.get_rollback(id).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(61)).await;
    }
    assert!(h.manager.get_rollback(id).await.is_none());
    assert!(h.manager.store().get(id).await.unwrap().is_none());
    sweeper.abort();
}

#[tokio::test]
async fn test_clear_quarantined_rejects_other_states() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    let err = h.manager.clear_quarantined(id).await.unwrap_err();
    assert!(matches!(
        rollback_err(&err),
        RollbackError::InvalidTransition { .. }
    ));
}

#[tokio::test]
async fn test_reload_reproduces_entries() {
    let mut h = Harness::new().await;
    let a = enable_available(&h, "a", 2, 1).await;
    h.manager.commit(a).await.unwrap();
    enable_available(&h, "b", 5, 4).await;
    h.installed.set("c", 1);
    h.manager
        .record_enabled_install(vec![pkg("c", 1, 0)], true, Vec::new())
        .await
        .unwrap();

    let snapshot = |records: Vec<rbk_types::RollbackRecord>| -> BTreeMap<RollbackId, RollbackState> {
        records.into_iter().map(|r| (r.id(), r.state)).collect()
    };
    let before = snapshot(h.manager.store().get_all(StateFilter::All).await.unwrap());

    let summary = h.manager.reload().await.unwrap();
    assert_eq!(summary.records, 3);
    let mut after = BTreeMap::new();
    for id in before.keys() {
        let record = h.manager.get_rollback(*id).await.unwrap();
        after.insert(record.id(), record.state);
    }
    assert_eq!(before, after);

    h.restart().await;
    for (id, state) in &before {
        assert_eq!(h.manager.get_rollback(*id).await.unwrap().state, *state);
    }
}

#[tokio::test]
async fn test_commit_async_delivers_status() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    h.manager.commit_async(id, tx).await.unwrap();
    let status = rx.await.unwrap();
    assert!(status.success);

    let (tx, rx) = tokio::sync::oneshot::channel();
    h.manager.commit_async(id, tx);
    let status = rx.await.unwrap();
    assert!(!status.success);
    assert_eq!(status.failure, Some(CommitFailureReason::NotFound));
}

#[tokio::test]
async fn test_service_handle_round_trip() {
    let h = Harness::new().await;
    let id = enable_available(&h, "app", 3, 2).await;
    let other = enable_available(&h, "lib", 8, 7).await;
    let handle = RollbackService::spawn(h.manager.clone());

    let available = handle.get_available_rollbacks().await.unwrap();
    assert_eq!(available.len(), 2);

    let status = handle.commit(id).await.unwrap().await.unwrap();
    assert!(status.success);
    let committed = handle.get_recently_committed_rollbacks().await.unwrap();
    assert_eq!(committed[0].id, id);

    assert_eq!(handle.expire_for_package("lib").await.unwrap(), vec![other]);
    let summary = handle.reload().await.unwrap();
    assert_eq!(summary.records, 1);
}

mod invariants {
    use super::common::{pkg, Harness};
    use proptest::prelude::*;
    use rbk_store::StateFilter;
    use rbk_types::VersionCode;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    enum Op {
        Record(Vec<usize>),
        MarkAvailable(usize),
        Commit(usize),
        Expire(usize),
        Supersede(usize),
        Sweep(u16),
    }

    const PACKAGES: [&str; 3] = ["a", "b", "c"];

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(0..PACKAGES.len(), 1..3).prop_map(Op::Record),
            (0..8usize).prop_map(Op::MarkAvailable),
            (0..8usize).prop_map(Op::Commit),
            (0..PACKAGES.len()).prop_map(Op::Expire),
            (0..PACKAGES.len()).prop_map(Op::Supersede),
            (0..40u16).prop_map(Op::Sweep),
        ]
    }

    async fn pending_per_package(h: &Harness) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in h.manager.store().get_all(StateFilter::Pending).await.unwrap() {
            for name in record.info.package_names() {
                *counts.entry(name.to_string()).or_default() += 1;
            }
        }
        counts
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn at_most_one_pending_entry_per_package(ops in proptest::collection::vec(op(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let h = Harness::new().await;
                for name in PACKAGES {
                    h.installed.set(name, 10);
                }
                let mut ids = Vec::new();
                for op in ops {
                    match op {
                        Op::Record(indices) => {
                            let mut names: Vec<_> = indices.iter().map(|i| PACKAGES[*i]).collect();
                            names.sort_unstable();
                            names.dedup();
                            let packages = names
                                .iter()
                                .map(|n| pkg(n, 10, 1))
                                .collect();
                            if let Ok(id) = h.manager.record_enabled_install(packages, false, Vec::new()).await {
                                ids.push(id);
                            }
                        }
                        Op::MarkAvailable(i) => {
                            if let Some(id) = ids.get(i) {
                                let _ = h.manager.mark_available(*id).await;
                            }
                        }
                        Op::Commit(i) => {
                            if let Some(id) = ids.get(i) {
                                let _ = h.manager.commit(*id).await;
                            }
                        }
                        Op::Expire(p) => {
                            h.manager.expire_for_package(PACKAGES[p]).await.unwrap();
                        }
                        Op::Supersede(p) => {
                            h.manager
                                .on_package_installed(PACKAGES[p], VersionCode(20), true)
                                .await
                                .unwrap();
                        }
                        Op::Sweep(days) => {
                            h.clock.advance(chrono::Duration::days(i64::from(days)));
                            h.manager.sweep().await.unwrap();
                        }
                    }
                    for (package, count) in pending_per_package(&h).await {
                        assert!(count <= 1, "{package} has {count} pending rollbacks");
                    }
                }
            });
        }
    }
}
