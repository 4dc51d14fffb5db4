use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use typeshare::typeshare;

/// Files and bytes of one category on the store
#[typeshare]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    #[typeshare(serialized_as = "number")]
    pub files: u64,
    #[typeshare(serialized_as = "number")]
    pub bytes: u64,
}

/// Outcome of one sync run
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Everything the store now holds per category (copied + up to date)
    pub categories: BTreeMap<String, CategoryTotals>,
    #[typeshare(serialized_as = "number")]
    pub files_copied: u64,
    #[typeshare(serialized_as = "number")]
    pub bytes_copied: u64,
    #[typeshare(serialized_as = "number")]
    pub files_up_to_date: u64,
    #[typeshare(serialized_as = "number")]
    pub files_excluded: u64,
    pub manifest_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            succeeded: false,
            started_at: Utc::now(),
            finished_at: None,
            categories: BTreeMap::new(),
            files_copied: 0,
            bytes_copied: 0,
            files_up_to_date: 0,
            files_excluded: 0,
            manifest_path: None,
            error: None,
        }
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

/// `MANIFEST.json` written at the store root
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub categories: BTreeMap<String, CategoryTotals>,
    pub total_files: u64,
    pub total_bytes: u64,
}
