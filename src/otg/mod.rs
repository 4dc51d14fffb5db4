//! USB gadget plumbing over ConfigFS
//!
//! ```text
//! ConfigFsBinder (implements UdcBinder)
//!     └── OtgGadgetManager (one gadget directory, one configuration)
//!             ├── EndpointAllocator
//!             ├── EcmFunction           network
//!             ├── MassStorageFunction   backing image LUN
//!             ├── AcmFunction           serial console
//!             └── HidKeyboardFunction   keystroke injection
//! ```

pub mod acm;
pub mod configfs;
pub mod ecm;
pub mod endpoint;
pub mod function;
pub mod hid;
pub mod manager;
pub mod msd;
pub mod report_desc;
pub mod service;

pub use acm::AcmFunction;
pub use ecm::EcmFunction;
pub use endpoint::EndpointAllocator;
pub use function::{FunctionMeta, GadgetFunction};
pub use hid::{HidKeyboardFunction, KEYBOARD_REPORT_LEN};
pub use manager::{wait_for_device_nodes, GadgetDescriptor, OtgGadgetManager};
pub use msd::{LunConfig, MassStorageFunction};
pub use service::ConfigFsBinder;
