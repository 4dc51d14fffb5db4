//! Connection-triggered packet capture

pub mod collector;
pub mod history;
pub mod host;
pub mod link;
pub mod orchestrator;
pub mod process;
pub mod types;

pub use collector::{CollectionTrigger, CommandTrigger};
pub use history::{run_history_recorder, CaptureHistory};
pub use host::{CommandHostProbe, HostProbe, HostSnapshot, NeighborEntry};
pub use link::{LinkProbe, LinkStatus, SysfsLinkProbe};
pub use orchestrator::CaptureOrchestrator;
pub use process::{CaptureLauncher, CaptureProcess, TcpdumpLauncher};
pub use types::{CaptureError, CaptureRecord, CaptureState, CaptureStatus, EndReason};
