//! HID keyboard function

use std::path::{Path, PathBuf};
use tracing::debug;

use super::configfs::{create_dir, remove_dir, write_bytes, write_file};
use super::function::GadgetFunction;
use super::report_desc::KEYBOARD;
use crate::error::Result;

/// Boot keyboard report length (modifier, reserved, six key slots)
pub const KEYBOARD_REPORT_LEN: u8 = 8;

/// Boot-protocol keyboard exposed as `/dev/hidgN`
#[derive(Debug, Clone)]
pub struct HidKeyboardFunction {
    instance: u8,
    name: String,
}

impl HidKeyboardFunction {
    pub fn new(instance: u8) -> Self {
        Self {
            instance,
            name: format!("hid.usb{}", instance),
        }
    }

    /// Device node the kernel creates once the gadget is bound
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/hidg{}", self.instance))
    }
}

impl GadgetFunction for HidKeyboardFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints_required(&self) -> u8 {
        1 // interrupt IN
    }

    fn description(&self) -> String {
        "Keyboard".to_string()
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir(&func_path)?;

        // protocol 1 = keyboard, subclass 1 = boot interface
        write_file(&func_path.join("protocol"), "1")?;
        write_file(&func_path.join("subclass"), "1")?;
        write_file(
            &func_path.join("report_length"),
            &KEYBOARD_REPORT_LEN.to_string(),
        )?;
        write_bytes(&func_path.join("report_desc"), KEYBOARD)?;

        debug!(
            "Created HID function: {} at {}",
            self.name(),
            func_path.display()
        );
        Ok(())
    }

    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        remove_dir(&self.function_path(gadget_path))?;
        debug!("Cleaned up HID function {}", self.name());
        Ok(())
    }
}
