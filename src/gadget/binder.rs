//! Seam between the mode state machine and the kernel gadget framework

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use super::mode::FunctionSet;
use super::types::ModeError;

/// Mass storage LUN parameters for one bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageParams {
    pub file: PathBuf,
    pub read_only: bool,
}

/// Per-switch function parameters
#[derive(Debug, Clone, Default)]
pub struct BindParams {
    /// Required when the function set includes mass storage
    pub storage: Option<StorageParams>,
}

/// What the current binding exposes, for status reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoundFunctions {
    pub udc: Option<String>,
    pub network_ifname: Option<String>,
    pub serial_tty: Option<PathBuf>,
    pub hid_device: Option<PathBuf>,
    pub storage: Option<PathBuf>,
}

/// Binds function configurations to the single UDC
#[async_trait]
pub trait UdcBinder: Send + Sync {
    /// Build the configuration for `functions` and bind it
    async fn bind(&self, functions: FunctionSet, params: &BindParams) -> Result<(), ModeError>;

    /// Unbind whatever is bound, waiting at most `timeout` for the UDC to settle
    async fn unbind(&self, timeout: Duration) -> Result<(), ModeError>;

    /// Change the LUN of the bound configuration in place (eject, set
    /// `ro`, re-insert) without touching the other functions
    async fn reconfigure_storage(&self, params: &StorageParams) -> Result<(), ModeError>;

    fn bound_functions(&self) -> BoundFunctions;
}
