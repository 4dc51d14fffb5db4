//! Gadget personalities and the controller that switches between them

pub mod binder;
pub mod controller;
pub mod mode;
pub mod network;
pub mod types;

pub use binder::{BindParams, BoundFunctions, StorageParams, UdcBinder};
pub use controller::GadgetController;
pub use mode::{FunctionSet, GadgetMode, UsbFunction};
pub use network::{IpCommandConfigurator, NetworkConfigurator};
pub use types::{ModeError, ModeSnapshot};
