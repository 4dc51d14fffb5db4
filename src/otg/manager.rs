//! Gadget lifecycle: build one configuration under ConfigFS, bind it, tear it down

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::configfs::{
    create_dir, read_file, remove_dir, udc_state, write_file, DEFAULT_USB_BCD_DEVICE,
    DEFAULT_USB_PRODUCT_ID, DEFAULT_USB_VENDOR_ID, USB_BCD_USB,
};
use super::endpoint::{EndpointAllocator, DEFAULT_MAX_ENDPOINTS};
use super::function::{FunctionMeta, GadgetFunction};
use crate::error::{AppError, Result};

const UNBIND_POLL_MS: u64 = 20;

/// USB device descriptor
#[derive(Debug, Clone)]
pub struct GadgetDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

impl Default for GadgetDescriptor {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            device_version: DEFAULT_USB_BCD_DEVICE,
            manufacturer: "Vivisect".to_string(),
            product: "Vivisect USB Device".to_string(),
            serial_number: "0123456789".to_string(),
        }
    }
}

/// Owns one gadget directory and the functions linked into `configs/c.1`
pub struct OtgGadgetManager {
    gadget_name: String,
    gadget_path: PathBuf,
    config_path: PathBuf,
    udc_class_dir: PathBuf,
    descriptor: GadgetDescriptor,
    endpoint_allocator: EndpointAllocator,
    functions: Vec<Box<dyn GadgetFunction>>,
    bound_udc: Option<String>,
    created_by_us: bool,
}

impl OtgGadgetManager {
    /// `configfs_root` is normally `/sys/kernel/config/usb_gadget`,
    /// `udc_class_dir` normally `/sys/class/udc`
    pub fn new(
        configfs_root: &Path,
        udc_class_dir: &Path,
        gadget_name: &str,
        descriptor: GadgetDescriptor,
    ) -> Self {
        let gadget_path = configfs_root.join(gadget_name);
        let config_path = gadget_path.join("configs/c.1");

        Self {
            gadget_name: gadget_name.to_string(),
            gadget_path,
            config_path,
            udc_class_dir: udc_class_dir.to_path_buf(),
            descriptor,
            endpoint_allocator: EndpointAllocator::new(DEFAULT_MAX_ENDPOINTS),
            functions: Vec::with_capacity(3),
            bound_udc: None,
            created_by_us: false,
        }
    }

    pub fn gadget_path(&self) -> &Path {
        &self.gadget_path
    }

    pub fn gadget_exists(&self) -> bool {
        self.gadget_path.exists()
    }

    /// Whether the `UDC` attribute currently names a controller
    pub fn is_bound(&self) -> bool {
        read_file(&self.gadget_path.join("UDC"))
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    pub fn bound_udc(&self) -> Option<&str> {
        self.bound_udc.as_deref()
    }

    /// Register a function, claiming its endpoints
    pub fn add_function(&mut self, func: Box<dyn GadgetFunction>) -> Result<()> {
        self.endpoint_allocator
            .allocate(func.name(), func.endpoints_required())?;
        self.functions.push(func);
        Ok(())
    }

    pub fn functions_meta(&self) -> Vec<FunctionMeta> {
        self.functions.iter().map(|f| f.meta()).collect()
    }

    /// Create the gadget directory tree and link every registered function
    pub fn setup(&mut self) -> Result<()> {
        info!("Setting up USB gadget: {}", self.gadget_name);

        if self.gadget_exists() {
            // Left over from a previous run or another tool; start clean
            warn!("Gadget {} already exists, removing it first", self.gadget_name);
            self.created_by_us = true;
            self.cleanup()?;
        }

        create_dir(&self.gadget_path)?;
        self.created_by_us = true;

        self.set_device_descriptors()?;
        self.create_strings()?;
        self.create_configuration()?;

        for func in &self.functions {
            func.create(&self.gadget_path)?;
            func.link(&self.config_path, &self.gadget_path)?;
        }

        info!(
            "USB gadget setup complete ({} endpoints used)",
            self.endpoint_allocator.used()
        );
        Ok(())
    }

    /// Bind to `udc` and wait `settle` for enumeration to start
    pub fn bind(&mut self, udc: &str, settle: Duration) -> Result<()> {
        info!("Binding gadget to UDC: {}", udc);
        write_file(&self.gadget_path.join("UDC"), udc)?;
        self.bound_udc = Some(udc.to_string());
        std::thread::sleep(settle);

        if !self.is_bound() {
            return Err(AppError::Internal(format!(
                "UDC attribute empty after binding {}",
                udc
            )));
        }
        Ok(())
    }

    /// Detach from the UDC and wait up to `timeout` for it to settle
    ///
    /// Returns `Ok(false)` if the controller still reports bound or
    /// configured when the timeout expires.
    pub fn unbind(&mut self, timeout: Duration) -> Result<bool> {
        if !self.gadget_exists() || !self.is_bound() {
            self.bound_udc = None;
            return Ok(true);
        }

        let udc = self.bound_udc.take().or_else(|| {
            read_file(&self.gadget_path.join("UDC")).ok()
        });
        write_file(&self.gadget_path.join("UDC"), "")?;

        let deadline = Instant::now() + timeout;
        loop {
            let released = !self.is_bound();
            let idle = udc
                .as_deref()
                .and_then(|u| udc_state(&self.udc_class_dir, u))
                .map(|s| s != "configured")
                .unwrap_or(true);
            if released && idle {
                info!("Unbound gadget from UDC");
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!("UDC did not settle within {:?}", timeout);
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(UNBIND_POLL_MS));
        }
    }

    /// Remove everything `setup` created, in reverse order
    pub fn cleanup(&mut self) -> Result<()> {
        if !self.gadget_exists() {
            return Ok(());
        }

        info!("Cleaning up USB gadget: {}", self.gadget_name);

        if self.is_bound() {
            let _ = write_file(&self.gadget_path.join("UDC"), "");
            self.bound_udc = None;
        }

        for func in self.functions.iter().rev() {
            let _ = func.unlink(&self.config_path);
        }

        let _ = remove_dir(&self.config_path.join("strings/0x409"));
        let _ = remove_dir(&self.config_path);

        for func in self.functions.iter().rev() {
            let _ = func.cleanup(&self.gadget_path);
        }

        let _ = remove_dir(&self.gadget_path.join("strings/0x409"));
        if let Err(e) = remove_dir(&self.gadget_path) {
            warn!("Could not remove gadget directory: {}", e);
        }

        self.created_by_us = false;
        Ok(())
    }

    fn set_device_descriptors(&self) -> Result<()> {
        let hex = |v: u16| format!("0x{:04x}", v);
        write_file(&self.gadget_path.join("idVendor"), &hex(self.descriptor.vendor_id))?;
        write_file(&self.gadget_path.join("idProduct"), &hex(self.descriptor.product_id))?;
        write_file(
            &self.gadget_path.join("bcdDevice"),
            &hex(self.descriptor.device_version),
        )?;
        write_file(&self.gadget_path.join("bcdUSB"), &hex(USB_BCD_USB))?;
        // Composite device; class comes from the interfaces
        write_file(&self.gadget_path.join("bDeviceClass"), "0x00")?;
        write_file(&self.gadget_path.join("bDeviceSubClass"), "0x00")?;
        write_file(&self.gadget_path.join("bDeviceProtocol"), "0x00")?;
        debug!("Set device descriptors");
        Ok(())
    }

    fn create_strings(&self) -> Result<()> {
        let strings_path = self.gadget_path.join("strings/0x409");
        create_dir(&strings_path)?;
        write_file(&strings_path.join("serialnumber"), &self.descriptor.serial_number)?;
        write_file(&strings_path.join("manufacturer"), &self.descriptor.manufacturer)?;
        write_file(&strings_path.join("product"), &self.descriptor.product)?;
        Ok(())
    }

    fn create_configuration(&self) -> Result<()> {
        create_dir(&self.config_path)?;

        let strings_path = self.config_path.join("strings/0x409");
        create_dir(&strings_path)?;
        let label = self
            .functions
            .iter()
            .map(|f| f.description())
            .collect::<Vec<_>>()
            .join(" + ");
        write_file(&strings_path.join("configuration"), &label)?;

        // 500mA
        write_file(&self.config_path.join("MaxPower"), "500")?;
        Ok(())
    }
}

impl Drop for OtgGadgetManager {
    fn drop(&mut self) {
        if self.created_by_us {
            if let Err(e) = self.cleanup() {
                error!("Failed to cleanup USB gadget on drop: {}", e);
            }
        }
    }
}

/// Wait for device nodes created by the bind (e.g. `/dev/hidg0`)
///
/// Exponential backoff from 10ms, capped at 100ms.
pub async fn wait_for_device_nodes(paths: &[PathBuf], timeout: Duration) -> bool {
    let start = Instant::now();
    let mut delay_ms = 10u64;
    const MAX_DELAY_MS: u64 = 100;

    while start.elapsed() < timeout {
        if paths.iter().all(|p| p.exists()) {
            return true;
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        let sleep = Duration::from_millis(delay_ms).min(remaining);
        if sleep.is_zero() {
            break;
        }
        tokio::time::sleep(sleep).await;
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }

    paths.iter().all(|p| p.exists())
}
