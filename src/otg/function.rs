//! USB gadget function trait

use std::path::{Path, PathBuf};

use super::configfs::{create_symlink, remove_file};
use crate::error::Result;

/// Function metadata
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    /// ConfigFS function name (e.g. "ecm.usb0")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Number of endpoints used
    pub endpoints: u8,
}

/// One function directory under `<gadget>/functions`
pub trait GadgetFunction: Send + Sync {
    /// ConfigFS name, `<driver>.<instance>`
    fn name(&self) -> &str;

    fn endpoints_required(&self) -> u8;

    fn description(&self) -> String;

    /// Create the function directory and write its attributes
    fn create(&self, gadget_path: &Path) -> Result<()>;

    /// Remove the function directory
    fn cleanup(&self, gadget_path: &Path) -> Result<()>;

    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: self.name().to_string(),
            description: self.description(),
            endpoints: self.endpoints_required(),
        }
    }

    fn function_path(&self, gadget_path: &Path) -> PathBuf {
        gadget_path.join("functions").join(self.name())
    }

    /// Link the function into a configuration
    fn link(&self, config_path: &Path, gadget_path: &Path) -> Result<()> {
        let link_path = config_path.join(self.name());
        if link_path.symlink_metadata().is_err() {
            create_symlink(&self.function_path(gadget_path), &link_path)?;
            tracing::debug!("Linked function {} to config", self.name());
        }
        Ok(())
    }

    fn unlink(&self, config_path: &Path) -> Result<()> {
        remove_file(&config_path.join(self.name()))?;
        tracing::debug!("Unlinked function {}", self.name());
        Ok(())
    }
}
