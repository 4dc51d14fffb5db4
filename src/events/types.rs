//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::capture::CaptureRecord;
use crate::gadget::GadgetMode;
use crate::payload::ExecutionState;
use crate::store::MountState;

/// System event enumeration
///
/// Serialized as `{"event": "<name>", "data": {...}}`:
/// ```json
/// {
///   "event": "gadget.mode_changed",
///   "data": { "mode": "multi", "read_only": false, "generation": 3 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// A mode switch completed
    #[serde(rename = "gadget.mode_changed")]
    GadgetModeChanged {
        mode: GadgetMode,
        read_only: bool,
        /// Successful UDC bind counter after the switch
        generation: u64,
    },

    /// A mode switch failed; the gadget is left `unbound` unless the
    /// failure was a rejected request (`busy`, `store_busy`)
    #[serde(rename = "gadget.mode_failed")]
    GadgetModeFailed {
        target: GadgetMode,
        /// Stable error code, e.g. "unbind_timeout", "bind_failed"
        error_code: String,
        message: String,
    },

    /// Backing store mount state changed
    #[serde(rename = "store.state_changed")]
    StoreStateChanged { state: MountState },

    /// Capture session opened on link-up
    #[serde(rename = "capture.started")]
    CaptureStarted {
        case_id: String,
        output_path: String,
    },

    /// Capture session finalized normally
    #[serde(rename = "capture.stopped")]
    CaptureStopped { record: CaptureRecord },

    /// Capture session finalized with an error
    #[serde(rename = "capture.failed")]
    CaptureFailed { record: CaptureRecord },

    /// Evidence sync finished (successfully or not)
    #[serde(rename = "sync.completed")]
    SyncCompleted {
        succeeded: bool,
        files_copied: u64,
        bytes_copied: u64,
        error: Option<String>,
    },

    /// Payload execution finished
    #[serde(rename = "hid.payload_finished")]
    PayloadFinished {
        execution_id: String,
        name: String,
        state: ExecutionState,
        error: Option<String>,
    },

    /// WebSocket error notification (for connection-level errors like lag)
    #[serde(rename = "error")]
    Error { message: String },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::GadgetModeChanged { .. } => "gadget.mode_changed",
            Self::GadgetModeFailed { .. } => "gadget.mode_failed",
            Self::StoreStateChanged { .. } => "store.state_changed",
            Self::CaptureStarted { .. } => "capture.started",
            Self::CaptureStopped { .. } => "capture.stopped",
            Self::CaptureFailed { .. } => "capture.failed",
            Self::SyncCompleted { .. } => "sync.completed",
            Self::PayloadFinished { .. } => "hid.payload_finished",
            Self::Error { .. } => "error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports `*` (everything), prefix wildcards such as `capture.*`,
    /// and exact names.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SystemEvent::GadgetModeChanged {
            mode: GadgetMode::Multi,
            read_only: false,
            generation: 1,
        };
        assert_eq!(event.event_name(), "gadget.mode_changed");

        let event = SystemEvent::StoreStateChanged {
            state: MountState::MountedLocal,
        };
        assert_eq!(event.event_name(), "store.state_changed");
    }

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::CaptureStarted {
            case_id: "USB_20260101_120000".to_string(),
            output_path: "/tmp/x.pcap".to_string(),
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("capture.*"));
        assert!(event.matches_topic("capture.started"));
        assert!(!event.matches_topic("gadget.*"));
        assert!(!event.matches_topic("capt.*"));
        assert!(!event.matches_topic("capture.stopped"));
    }

    #[test]
    fn test_serialization() {
        let event = SystemEvent::GadgetModeChanged {
            mode: GadgetMode::StorageReadOnly,
            read_only: true,
            generation: 7,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("gadget.mode_changed"));
        assert!(json.contains("storage_read_only"));

        let deserialized: SystemEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            deserialized,
            SystemEvent::GadgetModeChanged { generation: 7, .. }
        ));
    }
}
