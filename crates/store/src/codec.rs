//! Byte-level encoding of persisted records
//!
//! Decoding is a pure function of the bytes; nothing here touches the
//! filesystem or any cache.

use rbk_errors::{Error, StorageError};
use rbk_types::{CommitJournal, RollbackRecord, RECORD_FORMAT_VERSION};

/// Encode a record for storage
///
/// # Errors
///
/// Returns `StorageError::SerializeFailed` if serialization fails.
pub fn encode_record(record: &RollbackRecord) -> Result<Vec<u8>, Error> {
    serde_json::to_vec_pretty(record).map_err(|e| {
        StorageError::SerializeFailed {
            what: format!("rollback {}", record.id()),
            message: e.to_string(),
        }
        .into()
    })
}

/// Decode a stored record
///
/// # Errors
///
/// Returns a description of why the bytes are not a valid record: malformed
/// JSON, an unknown format version, or a structurally invalid rollback.
pub fn decode_record(bytes: &[u8]) -> Result<RollbackRecord, String> {
    let record: RollbackRecord = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if record.format_version != RECORD_FORMAT_VERSION {
        return Err(format!(
            "unsupported record format {} (expected {RECORD_FORMAT_VERSION})",
            record.format_version
        ));
    }
    record.info.check().map_err(|e| e.to_string())?;
    Ok(record)
}

pub(crate) fn encode_journal(journal: &CommitJournal) -> Result<Vec<u8>, Error> {
    serde_json::to_vec_pretty(journal).map_err(|e| {
        StorageError::SerializeFailed {
            what: format!("journal for rollback {}", journal.rollback_id),
            message: e.to_string(),
        }
        .into()
    })
}

pub(crate) fn decode_journal(bytes: &[u8]) -> Result<CommitJournal, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}
