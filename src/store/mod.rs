//! Backing store: the block image behind the mass storage function

pub mod image;
pub mod manager;
pub mod mounter;
pub mod types;

pub use manager::{BackingStoreManager, LocalMount};
pub use mounter::{LoopMounter, Mounter};
pub use types::{MountState, StoreError, StoreInfo};
