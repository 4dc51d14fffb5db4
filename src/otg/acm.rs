//! CDC ACM serial function (`/dev/ttyGS<port>` on the device side)

use std::path::{Path, PathBuf};
use tracing::debug;

use super::configfs::{create_dir, read_file, remove_dir};
use super::function::GadgetFunction;
use crate::error::Result;

/// Baud rate the serial console is documented at; ACM ignores line coding
pub const SERIAL_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct AcmFunction {
    name: String,
}

impl AcmFunction {
    pub fn new(instance: u8) -> Self {
        Self {
            name: format!("acm.usb{}", instance),
        }
    }

    /// TTY node for the port the kernel allocated (`port_num`), if known
    pub fn tty_path(&self, gadget_path: &Path) -> Option<PathBuf> {
        read_file(&self.function_path(gadget_path).join("port_num"))
            .ok()
            .and_then(|n| n.parse::<u32>().ok())
            .map(|n| PathBuf::from(format!("/dev/ttyGS{}", n)))
    }
}

impl GadgetFunction for AcmFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints_required(&self) -> u8 {
        3 // notify IN + bulk IN + bulk OUT
    }

    fn description(&self) -> String {
        "Serial console (CDC ACM)".to_string()
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        create_dir(&self.function_path(gadget_path))?;
        debug!("Created serial function: {}", self.name);
        Ok(())
    }

    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        remove_dir(&self.function_path(gadget_path))?;
        debug!("Cleaned up serial function {}", self.name);
        Ok(())
    }
}
