//! CDC ECM network function

use std::path::Path;
use tracing::debug;

use super::configfs::{create_dir, read_file, remove_dir, write_file};
use super::function::GadgetFunction;
use crate::error::{AppError, Result};

/// Ethernet-over-USB function; the device side shows up as `usbN`
#[derive(Debug, Clone)]
pub struct EcmFunction {
    name: String,
    dev_addr: Option<String>,
    host_addr: Option<String>,
}

impl EcmFunction {
    pub fn new(instance: u8, dev_addr: Option<String>, host_addr: Option<String>) -> Self {
        Self {
            name: format!("ecm.usb{}", instance),
            dev_addr,
            host_addr,
        }
    }

    /// Interface name the kernel assigned (`ifname` is populated after bind)
    pub fn ifname(&self, gadget_path: &Path) -> Option<String> {
        read_file(&self.function_path(gadget_path).join("ifname"))
            .ok()
            .filter(|s| !s.is_empty() && !s.contains('%'))
    }
}

fn validate_mac(mac: &str) -> Result<()> {
    let parts: Vec<&str> = mac.split(':').collect();
    let valid = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("Invalid MAC address: {}", mac)))
    }
}

impl GadgetFunction for EcmFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints_required(&self) -> u8 {
        3 // notify IN + bulk IN + bulk OUT
    }

    fn description(&self) -> String {
        "Ethernet (CDC ECM)".to_string()
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir(&func_path)?;

        if let Some(ref mac) = self.dev_addr {
            validate_mac(mac)?;
            write_file(&func_path.join("dev_addr"), mac)?;
        }
        if let Some(ref mac) = self.host_addr {
            validate_mac(mac)?;
            write_file(&func_path.join("host_addr"), mac)?;
        }

        debug!("Created network function: {}", self.name);
        Ok(())
    }

    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        remove_dir(&self.function_path(gadget_path))?;
        debug!("Cleaned up network function {}", self.name);
        Ok(())
    }
}
