#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Durable record storage for rbk
//!
//! This crate manages the rollback data directory. Each rollback entry lives
//! in its own file under `rollbacks/`, keyed by id, and is replaced with a
//! write-then-rename so a crash never exposes a half-written record. The
//! directory also holds the id counter, commit journals, per-package version
//! watermarks and a `quarantine/` area for files that failed to decode.

mod atomic;
pub mod codec;

pub use codec::{decode_record, encode_record};

use chrono::Utc;
use rbk_config::constants::{
    JOURNAL_DIR, NEXT_ID_FILE, QUARANTINE_DIR, ROLLBACKS_DIR, WATERMARKS_FILE,
};
use rbk_errors::{Error, StorageError};
use rbk_types::{CommitJournal, RollbackId, RollbackRecord, RollbackState, VersionCode};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Highest version installed without rollback, per package
pub type Watermarks = BTreeMap<String, VersionCode>;

/// Which records `get_all` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    All,
    /// `Enabled` or `Available`
    Pending,
    Is(RollbackState),
}

impl StateFilter {
    #[must_use]
    pub fn matches(self, state: RollbackState) -> bool {
        match self {
            Self::All => true,
            Self::Pending => state.is_pending(),
            Self::Is(wanted) => state == wanted,
        }
    }
}

/// A persisted file that could not be decoded
#[derive(Debug, Clone)]
pub struct CorruptRecord {
    pub path: PathBuf,
    /// Where the file was moved, when loading in repair mode
    pub quarantined_to: Option<PathBuf>,
    pub error: StorageError,
}

/// Everything reconstructed by a full load
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Decoded records, ordered by id
    pub records: Vec<RollbackRecord>,
    /// Journals of commits that were in flight, ordered by rollback id
    pub journals: Vec<CommitJournal>,
    pub watermarks: Watermarks,
    pub corrupt: Vec<CorruptRecord>,
    /// Temp files of interrupted writes that were removed
    pub stray_temps: Vec<PathBuf>,
    /// `(previous, repaired)` when the id counter was behind the files on disk
    pub counter_repaired: Option<(u64, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Look only; never modify the directory
    ReadOnly,
    /// Remove stray temp files and quarantine corrupt ones
    Repair,
}

/// File-backed rollback record store
pub struct RecordStore {
    root: PathBuf,
    rollbacks_dir: PathBuf,
    journal_dir: PathBuf,
    quarantine_dir: PathBuf,
    next_id_path: PathBuf,
    watermarks_path: PathBuf,
    next_id: Mutex<u64>,
    read_only: bool,
}

impl RecordStore {
    /// Open (creating if needed) the store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created or the id
    /// counter cannot be brought in line with the records on disk.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let store = Self::layout(root.into(), false);

        for dir in [&store.rollbacks_dir, &store.journal_dir, &store.quarantine_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, dir))?;
        }

        store.sync_counter(false).await?;
        Ok(store)
    }

    /// Open an existing store for inspection only
    ///
    /// Nothing under `root` is created or modified; every mutating method
    /// fails on a store opened this way.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::PathNotFound` if `root` does not exist.
    pub async fn open_read_only(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let store = Self::layout(root.into(), true);
        fs::metadata(&store.root)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &store.root))?;
        store.sync_counter(false).await?;
        Ok(store)
    }

    fn layout(root: PathBuf, read_only: bool) -> Self {
        Self {
            rollbacks_dir: root.join(ROLLBACKS_DIR),
            journal_dir: root.join(JOURNAL_DIR),
            quarantine_dir: root.join(QUARANTINE_DIR),
            next_id_path: root.join(NEXT_ID_FILE),
            watermarks_path: root.join(WATERMARKS_FILE),
            root,
            next_id: Mutex::new(1),
            read_only,
        }
    }

    fn ensure_writable(&self) -> Result<(), Error> {
        if self.read_only {
            return Err(StorageError::PermissionDenied {
                path: format!("{} (opened read-only)", self.root.display()),
            }
            .into());
        }
        Ok(())
    }

    /// Next id [`RecordStore::allocate_id`] would hand out
    pub async fn peek_next_id(&self) -> RollbackId {
        RollbackId(*self.next_id.lock().await)
    }

    /// Root of the data directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: RollbackId) -> PathBuf {
        self.rollbacks_dir.join(format!("{id}.json"))
    }

    fn journal_path(&self, id: RollbackId) -> PathBuf {
        self.journal_dir.join(format!("{id}.json"))
    }

    /// Hand out the next rollback id; the counter is durable before the id is returned
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be persisted.
    pub async fn allocate_id(&self) -> Result<RollbackId, Error> {
        self.ensure_writable()?;
        let mut next = self.next_id.lock().await;
        let id = *next;
        let following = successor(id)?;
        atomic::write_atomic(&self.next_id_path, following.to_string().as_bytes()).await?;
        *next = following;
        Ok(RollbackId(id))
    }

    /// Persist `record`, replacing any previous version of it
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the atomic write fails.
    pub async fn put(&self, record: &RollbackRecord) -> Result<(), Error> {
        self.ensure_writable()?;
        let bytes = encode_record(record)?;
        atomic::write_atomic(&self.record_path(record.id()), &bytes).await
    }

    /// Read one record
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CorruptedRecord` if the file exists but does not
    /// decode, or an I/O error if it cannot be read.
    pub async fn get(&self, id: RollbackId) -> Result<Option<RollbackRecord>, Error> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io_with_path(&e, &path).into()),
        };
        match decode_named_record(&bytes, id) {
            Ok(record) => Ok(Some(record)),
            Err(message) => Err(corrupted(&path, message).into()),
        }
    }

    /// Read every decodable record whose state matches `filter`, ordered by id
    ///
    /// Corrupt files are skipped; use [`RecordStore::load_all`] to surface them.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be listed.
    pub async fn get_all(&self, filter: StateFilter) -> Result<Vec<RollbackRecord>, Error> {
        let mut report = LoadReport::default();
        self.scan_records(ScanMode::ReadOnly, &mut report).await?;
        Ok(report
            .records
            .into_iter()
            .filter(|r| filter.matches(r.state))
            .collect())
    }

    /// Remove a record; returns whether it existed
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn delete(&self, id: RollbackId) -> Result<bool, Error> {
        self.ensure_writable()?;
        atomic::remove_durable(&self.record_path(id)).await
    }

    /// Rebuild everything from disk, repairing what a crash can leave behind
    ///
    /// Stray temp files are removed, undecodable files are moved to
    /// `quarantine/` and reported, and the id counter is advanced past every
    /// id seen. Calling it twice yields the same records.
    ///
    /// # Errors
    ///
    /// Returns an error only for directory-level I/O failures; individual bad
    /// files never fail the load.
    pub async fn load_all(&self) -> Result<LoadReport, Error> {
        self.ensure_writable()?;
        self.scan(ScanMode::Repair).await
    }

    /// Like [`RecordStore::load_all`] but never modifies the directory
    ///
    /// # Errors
    ///
    /// Returns an error only for directory-level I/O failures.
    pub async fn inspect(&self) -> Result<LoadReport, Error> {
        self.scan(ScanMode::ReadOnly).await
    }

    async fn scan(&self, mode: ScanMode) -> Result<LoadReport, Error> {
        let mut report = LoadReport::default();
        self.scan_records(mode, &mut report).await?;
        self.scan_journals(mode, &mut report).await?;
        report.watermarks = self.read_watermarks(mode, &mut report).await?;
        if mode == ScanMode::Repair {
            report.counter_repaired = self.sync_counter(true).await?;
        }
        Ok(report)
    }

    async fn scan_records(&self, mode: ScanMode, report: &mut LoadReport) -> Result<(), Error> {
        for (path, id) in self.list_id_files(&self.rollbacks_dir, mode, report).await? {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from_io_with_path(&e, &path).into()),
            };
            match decode_named_record(&bytes, id) {
                Ok(record) => report.records.push(record),
                Err(message) => self.report_corrupt(mode, path, message, report).await?,
            }
        }
        report.records.sort_by_key(RollbackRecord::id);
        Ok(())
    }

    async fn scan_journals(&self, mode: ScanMode, report: &mut LoadReport) -> Result<(), Error> {
        for (path, id) in self.list_id_files(&self.journal_dir, mode, report).await? {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from_io_with_path(&e, &path).into()),
            };
            match codec::decode_journal(&bytes) {
                Ok(journal) if journal.rollback_id == id => report.journals.push(journal),
                Ok(journal) => {
                    let message = format!(
                        "journal names rollback {} but is stored as {id}",
                        journal.rollback_id
                    );
                    self.report_corrupt(mode, path, message, report).await?;
                }
                Err(message) => self.report_corrupt(mode, path, message, report).await?,
            }
        }
        report.journals.sort_by_key(|j| j.rollback_id);
        Ok(())
    }

    /// `<id>.json` files in `dir`; temp files are collected (and removed in repair mode)
    async fn list_id_files(
        &self,
        dir: &Path,
        mode: ScanMode,
        report: &mut LoadReport,
    ) -> Result<Vec<(PathBuf, RollbackId)>, Error> {
        let mut files = Vec::new();
        let Some(mut entries) = read_dir_if_exists(dir).await? else {
            return Ok(files);
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, dir))?
        {
            let path = entry.path();
            if atomic::is_tmp(&path) {
                if mode == ScanMode::Repair {
                    atomic::remove_durable(&path).await?;
                }
                report.stray_temps.push(path);
                continue;
            }
            match parse_id_file_name(&path) {
                Some(id) => files.push((path, id)),
                None => tracing::debug!(path = %path.display(), "ignoring unexpected file"),
            }
        }
        Ok(files)
    }

    async fn report_corrupt(
        &self,
        mode: ScanMode,
        path: PathBuf,
        message: String,
        report: &mut LoadReport,
    ) -> Result<(), Error> {
        let quarantined_to = match mode {
            ScanMode::Repair => Some(self.quarantine(&path).await?),
            ScanMode::ReadOnly => None,
        };
        report.corrupt.push(CorruptRecord {
            error: corrupted(&path, message),
            path,
            quarantined_to,
        });
        Ok(())
    }

    async fn quarantine(&self, path: &Path) -> Result<PathBuf, Error> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");
        let target = self.quarantine_dir.join(format!("{name}.{stamp}"));
        atomic::move_durable(path, &target).await?;
        Ok(target)
    }

    /// Record that a commit is in flight, or advance its phase
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be written durably.
    pub async fn write_journal(&self, journal: &CommitJournal) -> Result<(), Error> {
        self.ensure_writable()?;
        let bytes = codec::encode_journal(journal)?;
        atomic::write_atomic(&self.journal_path(journal.rollback_id), &bytes).await
    }

    /// Remove the journal of a finished commit
    ///
    /// # Errors
    ///
    /// Returns an error if the journal exists but cannot be removed.
    pub async fn remove_journal(&self, id: RollbackId) -> Result<bool, Error> {
        self.ensure_writable()?;
        atomic::remove_durable(&self.journal_path(id)).await
    }

    /// Persist the version watermarks
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the atomic write fails.
    pub async fn save_watermarks(&self, watermarks: &Watermarks) -> Result<(), Error> {
        self.ensure_writable()?;
        let bytes = serde_json::to_vec_pretty(watermarks).map_err(|e| StorageError::SerializeFailed {
            what: "watermarks".to_string(),
            message: e.to_string(),
        })?;
        atomic::write_atomic(&self.watermarks_path, &bytes).await
    }

    async fn read_watermarks(
        &self,
        mode: ScanMode,
        report: &mut LoadReport,
    ) -> Result<Watermarks, Error> {
        let path = &self.watermarks_path;
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Watermarks::new()),
            Err(e) => return Err(StorageError::from_io_with_path(&e, path).into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(watermarks) => Ok(watermarks),
            Err(e) => {
                self.report_corrupt(mode, path.clone(), e.to_string(), report)
                    .await?;
                Ok(Watermarks::new())
            }
        }
    }

    /// Make sure the next id is above every id present on disk
    ///
    /// The in-memory counter is always raised; with `persist` a stale counter
    /// file is rewritten and the repair is returned as `(stored, repaired)`.
    async fn sync_counter(&self, persist: bool) -> Result<Option<(u64, u64)>, Error> {
        let stored = self.read_counter().await?;
        let floor = match self.highest_id_on_disk().await? {
            Some(id) => successor(id)?,
            None => 1,
        };
        let mut next = self.next_id.lock().await;
        *next = (*next).max(stored).max(floor);
        if stored >= floor || !persist || self.read_only {
            return Ok(None);
        }
        atomic::write_atomic(&self.next_id_path, next.to_string().as_bytes()).await?;
        tracing::warn!(stored, repaired = *next, "rollback id counter was behind stored records");
        Ok(Some((stored, *next)))
    }

    async fn read_counter(&self) -> Result<u64, Error> {
        match fs::read_to_string(&self.next_id_path).await {
            Ok(content) => Ok(content.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    path = %self.next_id_path.display(),
                    "unreadable id counter; rebuilding from stored records"
                );
                1
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(1),
            Err(e) => Err(StorageError::from_io_with_path(&e, &self.next_id_path).into()),
        }
    }

    /// Largest id named by any record, journal or quarantined file
    async fn highest_id_on_disk(&self) -> Result<Option<u64>, Error> {
        let mut highest = None;
        for dir in [&self.rollbacks_dir, &self.journal_dir, &self.quarantine_dir] {
            let Some(mut entries) = read_dir_if_exists(dir).await? else {
                continue;
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, dir))?
            {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let digits: &str = name.split('.').next().unwrap_or_default();
                if let Ok(id) = digits.parse::<u64>() {
                    highest = highest.max(Some(id));
                }
            }
        }
        Ok(highest)
    }
}

async fn read_dir_if_exists(dir: &Path) -> Result<Option<fs::ReadDir>, Error> {
    match fs::read_dir(dir).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::from_io_with_path(&e, dir).into()),
    }
}

fn parse_id_file_name(path: &Path) -> Option<RollbackId> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn decode_named_record(bytes: &[u8], id: RollbackId) -> Result<RollbackRecord, String> {
    let record = decode_record(bytes)?;
    if record.id() != id {
        return Err(format!(
            "record names rollback {} but is stored as {id}",
            record.id()
        ));
    }
    Ok(record)
}

fn corrupted(path: &Path, message: String) -> StorageError {
    StorageError::CorruptedRecord {
        path: path.display().to_string(),
        message,
    }
}

fn successor(id: u64) -> Result<u64, Error> {
    id.checked_add(1)
        .ok_or_else(|| StorageError::IdsExhausted { last: id }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_file_name() {
        assert_eq!(
            parse_id_file_name(Path::new("/d/rollbacks/17.json")),
            Some(RollbackId(17))
        );
        assert_eq!(parse_id_file_name(Path::new("/d/rollbacks/17.json.tmp")), None);
        assert_eq!(parse_id_file_name(Path::new("/d/rollbacks/notes.json")), None);
        assert_eq!(parse_id_file_name(Path::new("/d/rollbacks/17")), None);
    }

    #[test]
    fn test_successor_stops_at_id_space_end() {
        assert_eq!(successor(41).unwrap(), 42);
        assert!(matches!(
            successor(u64::MAX),
            Err(Error::Storage(StorageError::IdsExhausted { last: u64::MAX }))
        ));
    }

    #[test]
    fn test_state_filter() {
        assert!(StateFilter::Pending.matches(RollbackState::Enabled));
        assert!(StateFilter::Pending.matches(RollbackState::Available));
        assert!(!StateFilter::Pending.matches(RollbackState::Committed));
        assert!(StateFilter::Is(RollbackState::Committed).matches(RollbackState::Committed));
        assert!(StateFilter::All.matches(RollbackState::Expired));
    }
}
