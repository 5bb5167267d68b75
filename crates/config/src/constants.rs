//! Fixed names inside the rollback data directory
//!
//! Only the directory itself is configurable; the layout below it is not, so
//! every tool reading the store agrees on it.

pub const DEFAULT_DATA_DIR: &str = "/var/lib/rbk";

pub const ROLLBACKS_DIR: &str = "rollbacks";
pub const JOURNAL_DIR: &str = "journal";
pub const QUARANTINE_DIR: &str = "quarantine";
pub const NEXT_ID_FILE: &str = "next_id";
pub const WATERMARKS_FILE: &str = "watermarks.json";

/// Default lifetime of an available rollback (14 days)
pub const DEFAULT_ROLLBACK_LIFETIME_SECS: u64 = 14 * 24 * 60 * 60;
/// Default interval between expiration sweeps (1 hour)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
/// Default retention of committed rollback history (30 days)
pub const DEFAULT_COMMITTED_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;
