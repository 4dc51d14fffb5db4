//! vivisect-gadget - USB gadget personality subsystem
//!
//! Switches a device-mode USB controller between mutually exclusive gadget
//! personalities, captures traffic whenever a host brings the network
//! function up, shares a backing image between the host and local evidence
//! sync, and injects keystroke payloads through the HID keyboard function.

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod gadget;
pub mod otg;
pub mod payload;
pub mod state;
pub mod store;
pub mod sync;
pub mod utils;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
