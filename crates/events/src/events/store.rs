use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Record store events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    /// A persisted record could not be decoded and was moved aside
    RecordCorrupted {
        path: PathBuf,
        quarantined_to: Option<PathBuf>,
        message: String,
    },

    /// A temp file left by an interrupted write was removed
    StrayTempRemoved { path: PathBuf },

    /// The id counter was behind the records on disk and was advanced
    CounterRepaired { from: u64, to: u64 },
}
