//! Fakes shared by the state tests
#![allow(dead_code)]

use async_trait::async_trait;
use rbk_events::{channel, EventReceiver};
use rbk_state::{
    Collaborators, ExpirationPolicy, InstalledVersions, ManualClock, PackageReverter,
    RevertError, RollbackManager,
};
use rbk_store::RecordStore;
use rbk_types::{PackageRollbackInfo, RollbackInfo, SessionId, Uuid, VersionCode};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Installed versions the test can change at will
#[derive(Debug, Default, Clone)]
pub struct FakeInstalled(Arc<Mutex<BTreeMap<String, VersionCode>>>);

impl FakeInstalled {
    pub fn set(&self, package: &str, version: u64) {
        self.0
            .lock()
            .unwrap()
            .insert(package.to_string(), VersionCode(version));
    }

    pub fn remove(&self, package: &str) {
        self.0.lock().unwrap().remove(package);
    }
}

impl InstalledVersions for FakeInstalled {
    fn current_version(&self, package: &str) -> Option<VersionCode> {
        self.0.lock().unwrap().get(package).copied()
    }
}

/// Reverter that records calls and applies versions to a [`FakeInstalled`]
#[derive(Debug, Default)]
pub struct FakeReverter {
    installed: FakeInstalled,
    fail_stage: Mutex<HashSet<String>>,
    fail_apply: Mutex<HashSet<String>>,
    pub applied: Mutex<Vec<String>>,
    pub abandoned: Mutex<Vec<SessionId>>,
    pub sessions: Mutex<Vec<SessionId>>,
    stage_gate: Mutex<Option<Arc<Notify>>>,
    pub stage_entered: Notify,
    corrupt_on_apply: Mutex<Option<PathBuf>>,
}

impl FakeReverter {
    pub fn new(installed: FakeInstalled) -> Self {
        Self {
            installed,
            ..Self::default()
        }
    }

    pub fn fail_stage(&self, package: &str) {
        self.fail_stage.lock().unwrap().insert(package.to_string());
    }

    pub fn fail_apply(&self, package: &str) {
        self.fail_apply.lock().unwrap().insert(package.to_string());
    }

    /// Park every `stage` call until `gate` is notified
    pub fn hold_stage(&self, gate: Arc<Notify>) {
        *self.stage_gate.lock().unwrap() = Some(gate);
    }

    /// Replace `path` with a directory during the next apply
    pub fn corrupt_on_apply(&self, path: PathBuf) {
        *self.corrupt_on_apply.lock().unwrap() = Some(path);
    }

    pub fn abandoned(&self) -> Vec<SessionId> {
        self.abandoned.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageReverter for FakeReverter {
    async fn open_session(&self, _rollback: &RollbackInfo) -> Result<SessionId, RevertError> {
        let session = Uuid::new_v4();
        self.sessions.lock().unwrap().push(session);
        Ok(session)
    }

    async fn stage(
        &self,
        _session: SessionId,
        package: &PackageRollbackInfo,
    ) -> Result<(), RevertError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let gate = self.stage_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.stage_entered.notify_one();
            gate.notified().await;
        }
        if self.fail_stage.lock().unwrap().contains(&package.package_name) {
            return Err(RevertError::package(&package.package_name, "staging failed"));
        }
        Ok(())
    }

    async fn apply(
        &self,
        _session: SessionId,
        package: &PackageRollbackInfo,
    ) -> Result<(), RevertError> {
        if self.fail_apply.lock().unwrap().contains(&package.package_name) {
            return Err(RevertError::package(&package.package_name, "apply failed"));
        }
        if let Some(path) = self.corrupt_on_apply.lock().unwrap().take() {
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir(&path).unwrap();
        }
        self.installed.set(
            &package.package_name,
            package.version_rolled_back_to.get(),
        );
        self.applied
            .lock()
            .unwrap()
            .push(package.package_name.clone());
        Ok(())
    }

    async fn abandon(&self, session: SessionId) -> Result<(), RevertError> {
        self.abandoned.lock().unwrap().push(session);
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub installed: FakeInstalled,
    pub reverter: Arc<FakeReverter>,
    pub clock: ManualClock,
    pub manager: Arc<RollbackManager>,
    pub events: EventReceiver,
}

pub fn policy() -> ExpirationPolicy {
    ExpirationPolicy::new(
        Duration::from_secs(14 * 24 * 3600),
        Duration::from_secs(30 * 24 * 3600),
    )
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let installed = FakeInstalled::default();
        let reverter = Arc::new(FakeReverter::new(installed.clone()));
        let clock = ManualClock::default();
        let (manager, events) = open_manager(dir.path(), &installed, &reverter, &clock).await;
        Self {
            dir,
            installed,
            reverter,
            clock,
            manager,
            events,
        }
    }

    /// A fresh manager over the same directory, as after a restart
    pub async fn restart(&mut self) {
        let (manager, events) =
            open_manager(self.dir.path(), &self.installed, &self.reverter, &self.clock).await;
        self.manager = manager;
        self.events = events;
    }

    /// Every event emitted so far
    pub fn drain_events(&mut self) -> Vec<rbk_events::AppEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            events.push(message.event);
        }
        events
    }
}

pub async fn open_manager(
    root: &Path,
    installed: &FakeInstalled,
    reverter: &Arc<FakeReverter>,
    clock: &ManualClock,
) -> (Arc<RollbackManager>, EventReceiver) {
    let (tx, rx) = channel();
    let store = RecordStore::open(root).await.expect("open store");
    let collaborators = Collaborators {
        installed: Arc::new(installed.clone()),
        reverter: reverter.clone(),
        clock: Arc::new(clock.clone()),
    };
    let manager = RollbackManager::open(store, policy(), collaborators, Some(tx))
        .await
        .expect("open manager");
    (manager, rx)
}

pub fn pkg(name: &str, from: u64, to: u64) -> PackageRollbackInfo {
    PackageRollbackInfo::new(name, from, to)
}
