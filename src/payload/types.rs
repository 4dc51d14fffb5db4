use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typeshare::typeshare;

/// Keystroke injection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HidError {
    #[error("HID device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Payload not found: {0}")]
    PayloadNotFound(String),

    #[error("Unsupported character {ch:?} at line {line}, column {column}")]
    UnsupportedCharacter { ch: char, line: usize, column: usize },

    #[error("Invalid token {token:?} at line {line}, column {column}")]
    InvalidToken {
        token: String,
        line: usize,
        column: usize,
    },

    #[error("HID write failed: {0}")]
    WriteFailed(String),
}

impl HidError {
    pub fn code(&self) -> &'static str {
        match self {
            HidError::DeviceUnavailable(_) => "device_unavailable",
            HidError::PayloadNotFound(_) => "payload_not_found",
            HidError::UnsupportedCharacter { .. } => "unsupported_character",
            HidError::InvalidToken { .. } => "invalid_token",
            HidError::WriteFailed(_) => "write_failed",
        }
    }
}

/// One parsed script element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadToken {
    Text(String),
    Delay(u64),
    /// Chorded press; `key` is 0 for a modifier-only press
    Combo { modifiers: u8, key: u8 },
}

/// Compiled keyboard action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Press { modifiers: u8, key: u8 },
    Release,
    Delay(u64),
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
}

/// Progress of one payload run; kept in memory only
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct PayloadExecution {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: ExecutionState,
    /// Events emitted so far
    pub steps: usize,
    pub total_steps: usize,
    pub error: Option<String>,
}

/// Listing entry for a payload document
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct PayloadSummary {
    pub name: String,
    pub description: String,
    pub valid: bool,
    pub error: Option<String>,
}

/// On-disk payload document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadDocument {
    pub description: String,
    pub script: String,
}
