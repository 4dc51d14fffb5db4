//! Evidence synchronizer

pub mod scheduler;
pub mod synchronizer;
pub mod types;

pub use scheduler::run_sync_scheduler;
pub use synchronizer::{Synchronizer, MANIFEST_NAME};
pub use types::{CategoryTotals, SyncReport};
