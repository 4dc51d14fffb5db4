use serde::Serialize;
use thiserror::Error;
use typeshare::typeshare;

use super::mode::{FunctionSet, GadgetMode};
use crate::store::StoreError;

/// Mode switch failure
#[derive(Error, Debug, Clone)]
pub enum ModeError {
    #[error("UDC did not settle within {0} ms after unbind")]
    UnbindTimeout(u64),

    #[error("Gadget bind failed: {0}")]
    BindFailed(String),

    #[error("Network configuration failed: {0}")]
    NetworkConfigFailed(String),

    #[error("Another mode switch is in progress")]
    Busy,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModeError {
    pub fn code(&self) -> &'static str {
        match self {
            ModeError::UnbindTimeout(_) => "unbind_timeout",
            ModeError::BindFailed(_) => "bind_failed",
            ModeError::NetworkConfigFailed(_) => "network_config_failed",
            ModeError::Busy => "busy",
            ModeError::Store(e) => e.code(),
        }
    }

    /// Whether the failure happened after the previous configuration was
    /// torn down (the gadget is left unbound)
    pub fn left_unbound(&self) -> bool {
        !matches!(self, ModeError::Busy | ModeError::Store(_))
    }
}

/// Point-in-time view of the controller
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct ModeSnapshot {
    pub mode: GadgetMode,
    pub read_only: bool,
    /// Incremented on every successful UDC bind
    #[typeshare(serialized_as = "number")]
    pub generation: u64,
    /// A switch is in flight
    pub switching: bool,
    /// Message of the last failed switch, cleared on success
    pub last_error: Option<String>,
}

impl ModeSnapshot {
    pub fn functions(&self) -> FunctionSet {
        self.mode.functions()
    }
}

impl Default for ModeSnapshot {
    fn default() -> Self {
        Self {
            mode: GadgetMode::Unbound,
            read_only: false,
            generation: 0,
            switching: false,
            last_error: None,
        }
    }
}
