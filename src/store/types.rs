//! Backing store types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use typeshare::typeshare;

use crate::config::StoreFilesystem;

/// Who currently has the backing image
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Nobody
    #[default]
    Unmounted,
    /// Loop-mounted on the device for the synchronizer
    MountedLocal,
    /// Attached to the mass storage LUN (or reserved for it)
    ExposedToHost,
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Backing store busy: {0}")]
    StoreBusy(String),

    #[error("Mount failed: {0}")]
    MountFailed(String),

    #[error("Filesystem error: {0}")]
    FilesystemError(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::StoreBusy(_) => "store_busy",
            StoreError::MountFailed(_) => "mount_failed",
            StoreError::FilesystemError(_) => "filesystem_error",
        }
    }
}

/// Backing store description for status endpoints
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub path: PathBuf,
    /// Actual file size, 0 when the image is missing
    #[typeshare(serialized_as = "number")]
    pub size_bytes: u64,
    pub label: String,
    pub filesystem: StoreFilesystem,
    pub exists: bool,
    pub mount_state: MountState,
    /// Private mount point used while `mounted_local`
    pub mount_point: PathBuf,
}
