use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typeshare::typeshare;

use super::host::HostSnapshot;

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Running,
    Stopped,
    Failed,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Running => "running",
            CaptureState::Stopped => "stopped",
            CaptureState::Failed => "failed",
        }
    }
}

/// Why a session was finalized
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    LinkDown,
    /// Network function torn down by a mode switch
    ModeExit,
    UnexpectedExit,
    StartFailed,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::LinkDown => "link_down",
            EndReason::ModeExit => "mode_exit",
            EndReason::UnexpectedExit => "unexpected_exit",
            EndReason::StartFailed => "start_failed",
            EndReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Failed to start capture: {0}")]
    SubprocessStartFailed(String),

    #[error("Capture process exited unexpectedly (exit code {0:?})")]
    UnexpectedExit(Option<i32>),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::SubprocessStartFailed(_) => "subprocess_start_failed",
            CaptureError::UnexpectedExit(_) => "unexpected_exit",
        }
    }
}

/// One capture session, open or finalized
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub case_id: String,
    pub output_path: String,
    pub state: CaptureState,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Size of the capture file
    #[typeshare(serialized_as = "number")]
    pub bytes_captured: u64,
    /// Link counter deltas over the session
    #[typeshare(serialized_as = "number")]
    pub rx_bytes: u64,
    #[typeshare(serialized_as = "number")]
    pub tx_bytes: u64,
    pub exit_code: Option<i32>,
    pub end_reason: Option<EndReason>,
    pub error: Option<String>,
    /// Who was on the other end when the link came up
    pub host: Option<HostSnapshot>,
}

impl CaptureRecord {
    pub fn new(case_id: String, output_path: String) -> Self {
        Self {
            case_id,
            output_path,
            state: CaptureState::Running,
            connected_at: Utc::now(),
            disconnected_at: None,
            bytes_captured: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            exit_code: None,
            end_reason: None,
            error: None,
            host: None,
        }
    }

    pub fn finish(mut self, state: CaptureState, reason: EndReason) -> Self {
        self.state = state;
        self.end_reason = Some(reason);
        self.disconnected_at = Some(Utc::now());
        self
    }

    pub fn with_error(mut self, error: &CaptureError) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Orchestrator status for the API
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub enabled: bool,
    pub link_up: bool,
    pub active: Option<CaptureRecord>,
    /// Newest first
    pub recent: Vec<CaptureRecord>,
}
