//! Mass storage function

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::configfs::{create_dir, remove_dir, write_file};
use super::function::GadgetFunction;
use crate::error::{AppError, Result};

/// LUN attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunConfig {
    /// Backing image
    pub file: PathBuf,
    /// Host sees the medium write-protected
    pub ro: bool,
    pub removable: bool,
    /// Ignore Force Unit Access (faster writes on SD-backed images)
    pub nofua: bool,
}

impl LunConfig {
    pub fn disk(file: PathBuf, read_only: bool) -> Self {
        Self {
            file,
            ro: read_only,
            removable: true,
            nofua: true,
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// `mass_storage.usbN` with a single LUN
#[derive(Debug, Clone)]
pub struct MassStorageFunction {
    name: String,
    lun: LunConfig,
}

impl MassStorageFunction {
    pub fn new(instance: u8, lun: LunConfig) -> Self {
        Self {
            name: format!("mass_storage.usb{}", instance),
            lun,
        }
    }

    fn lun_path(&self, gadget_path: &Path) -> PathBuf {
        self.function_path(gadget_path).join("lun.0")
    }

    /// Detach the backing file from the LUN
    ///
    /// `forced_eject` detaches even while the host holds the medium locked;
    /// older kernels only offer clearing `file`.
    pub fn eject(&self, gadget_path: &Path) -> Result<()> {
        let lun_path = self.lun_path(gadget_path);
        if !lun_path.exists() {
            return Ok(());
        }

        let forced_eject = lun_path.join("forced_eject");
        if forced_eject.exists() {
            match write_file(&forced_eject, "1") {
                Ok(()) => {
                    debug!("forced_eject on {}", self.name);
                    return Ok(());
                }
                Err(e) => warn!("forced_eject failed: {}, clearing file instead", e),
            }
        }
        write_file(&lun_path.join("file"), "")
    }

    /// Re-attach the LUN with new attributes without unbinding the gadget
    ///
    /// Blocking; use `reconfigure_async` from async code.
    pub fn reconfigure(&self, gadget_path: &Path, config: &LunConfig) -> Result<()> {
        let lun_path = self.lun_path(gadget_path);
        if !lun_path.exists() {
            return Err(AppError::Internal(format!(
                "LUN directory missing: {}",
                lun_path.display()
            )));
        }

        self.eject(gadget_path)?;
        // Let the host process the medium change before flipping `ro`
        std::thread::sleep(Duration::from_millis(50));

        self.write_lun_attrs(&lun_path, config)?;
        self.attach_file(&lun_path, &config.file)
    }

    pub async fn reconfigure_async(&self, gadget_path: &Path, config: &LunConfig) -> Result<()> {
        let gadget_path = gadget_path.to_path_buf();
        let config = config.clone();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.reconfigure(&gadget_path, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
    }

    /// Write only the attributes whose value differs
    fn write_lun_attrs(&self, lun_path: &Path, config: &LunConfig) -> Result<()> {
        let attrs = [
            ("ro", flag(config.ro)),
            ("removable", flag(config.removable)),
            ("nofua", flag(config.nofua)),
        ];

        for (attr, value) in attrs {
            let path = lun_path.join(attr);
            let current = fs::read_to_string(&path).unwrap_or_default();
            if current.trim() != value {
                debug!("Updating {} {}: {} -> {}", self.name, attr, current.trim(), value);
                write_file(&path, value)?;
            }
        }
        Ok(())
    }

    /// Set the backing file, retrying while the LUN reports EBUSY
    fn attach_file(&self, lun_path: &Path, file: &Path) -> Result<()> {
        if !file.exists() {
            return Err(AppError::Internal(format!(
                "Backing file does not exist: {}",
                file.display()
            )));
        }

        let value = file.to_string_lossy();
        let mut attempt = 0u32;
        loop {
            match write_file(&lun_path.join("file"), value.as_ref()) {
                Ok(()) => {
                    info!("{} backed by {}", self.name, file.display());
                    return Ok(());
                }
                Err(e) => {
                    let msg = e.to_string();
                    let busy = msg.contains("os error 16") || msg.contains("Device or resource busy");
                    if !busy || attempt >= 4 {
                        return Err(e);
                    }
                    warn!("{} file busy, retrying (attempt {}/5)", self.name, attempt + 1);
                    // 50, 100, 200, 400ms
                    std::thread::sleep(Duration::from_millis(50 << attempt));
                    attempt += 1;
                }
            }
        }
    }

    /// Currently attached backing file
    pub fn current_file(&self, gadget_path: &Path) -> Option<PathBuf> {
        fs::read_to_string(self.lun_path(gadget_path).join("file"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}

impl GadgetFunction for MassStorageFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints_required(&self) -> u8 {
        2 // bulk IN + OUT
    }

    fn description(&self) -> String {
        format!(
            "Mass Storage ({})",
            if self.lun.ro { "read-only" } else { "read-write" }
        )
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir(&func_path)?;

        let stall = func_path.join("stall");
        if stall.exists() {
            let _ = write_file(&stall, "0");
        }

        let lun_path = self.lun_path(gadget_path);
        if !lun_path.exists() {
            create_dir(&lun_path)?;
        }
        let _ = write_file(&lun_path.join("cdrom"), "0");

        self.write_lun_attrs(&lun_path, &self.lun)?;
        self.attach_file(&lun_path, &self.lun.file)?;

        debug!("Created mass storage function: {}", self.name);
        Ok(())
    }

    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        let _ = self.eject(gadget_path);
        if let Err(e) = remove_dir(&self.function_path(gadget_path)) {
            warn!("Could not remove mass storage function directory: {}", e);
        }
        debug!("Cleaned up mass storage function {}", self.name);
        Ok(())
    }
}
