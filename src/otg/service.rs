//! ConfigFS-backed UDC binder
//!
//! Owns the single `OtgGadgetManager`. Every bind builds a fresh gadget
//! directory for the requested function set; the previous one is torn
//! down first so only one configuration ever exists.
//!
//! ```text
//!   GadgetController
//!         │  bind / unbind / reconfigure_storage
//!         ▼
//!   ConfigFsBinder ── OtgGadgetManager ── ecm / mass_storage / acm / hid
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::acm::AcmFunction;
use super::configfs::{resolve_udc, CONFIGFS_PATH, DEFAULT_USB_BCD_DEVICE, UDC_CLASS_PATH};
use super::ecm::EcmFunction;
use super::hid::HidKeyboardFunction;
use super::manager::{GadgetDescriptor, OtgGadgetManager};
use super::msd::{LunConfig, MassStorageFunction};
use crate::config::{GadgetConfig, NetworkConfig};
use crate::gadget::{
    BindParams, BoundFunctions, FunctionSet, ModeError, StorageParams, UdcBinder, UsbFunction,
};

const DEFAULT_SERIAL_NUMBER: &str = "0123456789";

/// Slack on top of the unbind timeout for the blocking task itself
const UNBIND_TASK_SLACK: Duration = Duration::from_secs(1);

struct Bound {
    manager: OtgGadgetManager,
    storage: Option<MassStorageFunction>,
}

pub struct ConfigFsBinder {
    configfs_root: PathBuf,
    udc_class_dir: PathBuf,
    gadget: GadgetConfig,
    network: NetworkConfig,
    bound: Mutex<Option<Bound>>,
    status: RwLock<BoundFunctions>,
}

impl ConfigFsBinder {
    pub fn new(gadget: GadgetConfig, network: NetworkConfig) -> Self {
        Self::with_paths(
            PathBuf::from(CONFIGFS_PATH),
            PathBuf::from(UDC_CLASS_PATH),
            gadget,
            network,
        )
    }

    /// Use alternative ConfigFS and UDC class roots (tests, chroots)
    pub fn with_paths(
        configfs_root: PathBuf,
        udc_class_dir: PathBuf,
        gadget: GadgetConfig,
        network: NetworkConfig,
    ) -> Self {
        Self {
            configfs_root,
            udc_class_dir,
            gadget,
            network,
            bound: Mutex::new(None),
            status: RwLock::new(BoundFunctions::default()),
        }
    }

    /// Whether ConfigFS is mounted and at least one UDC exists
    pub fn is_available(&self) -> bool {
        self.configfs_root.exists()
            && resolve_udc(&self.udc_class_dir, self.gadget.udc.as_deref()).is_some()
    }

    fn descriptor(&self) -> GadgetDescriptor {
        let d = &self.gadget.descriptor;
        GadgetDescriptor {
            vendor_id: d.vendor_id,
            product_id: d.product_id,
            device_version: DEFAULT_USB_BCD_DEVICE,
            manufacturer: d.manufacturer.clone(),
            product: d.product.clone(),
            serial_number: d
                .serial_number
                .clone()
                .unwrap_or_else(|| DEFAULT_SERIAL_NUMBER.to_string()),
        }
    }

    /// Build a manager with the functions of `functions`, in a fixed order
    fn build(
        &self,
        functions: FunctionSet,
        params: &BindParams,
    ) -> Result<(OtgGadgetManager, Option<MassStorageFunction>), ModeError> {
        let mut manager = OtgGadgetManager::new(
            &self.configfs_root,
            &self.udc_class_dir,
            &self.gadget.name,
            self.descriptor(),
        );
        let mut storage = None;
        let bind_err = |e: crate::error::AppError| ModeError::BindFailed(e.to_string());

        for function in functions.iter() {
            match function {
                UsbFunction::Network => manager
                    .add_function(Box::new(EcmFunction::new(
                        0,
                        self.network.dev_addr.clone(),
                        self.network.host_addr.clone(),
                    )))
                    .map_err(bind_err)?,
                UsbFunction::MassStorage => {
                    let p = params.storage.as_ref().ok_or_else(|| {
                        ModeError::BindFailed("mass storage requested without a backing file".into())
                    })?;
                    let msd = MassStorageFunction::new(0, LunConfig::disk(p.file.clone(), p.read_only));
                    manager.add_function(Box::new(msd.clone())).map_err(bind_err)?;
                    storage = Some(msd);
                }
                UsbFunction::Serial => manager
                    .add_function(Box::new(AcmFunction::new(0)))
                    .map_err(bind_err)?,
                UsbFunction::Hid => manager
                    .add_function(Box::new(HidKeyboardFunction::new(0)))
                    .map_err(bind_err)?,
            }
        }

        Ok((manager, storage))
    }

    /// Remove any gadget left behind, bound or not
    pub async fn shutdown(&self) {
        let mut bound = self.bound.lock().await;
        if let Some(b) = bound.take() {
            info!("Tearing down USB gadget");
            // Drop runs cleanup, which touches sysfs
            let _ = tokio::task::spawn_blocking(move || drop(b)).await;
        }
        *self.status.write() = BoundFunctions::default();
    }
}

#[async_trait]
impl UdcBinder for ConfigFsBinder {
    async fn bind(&self, functions: FunctionSet, params: &BindParams) -> Result<(), ModeError> {
        let mut bound = self.bound.lock().await;

        if let Some(old) = bound.take() {
            debug!("Removing previous gadget configuration");
            let _ = tokio::task::spawn_blocking(move || drop(old)).await;
        }
        *self.status.write() = BoundFunctions::default();

        if functions.is_empty() {
            return Ok(());
        }

        let udc = resolve_udc(&self.udc_class_dir, self.gadget.udc.as_deref())
            .ok_or_else(|| ModeError::BindFailed("no USB device controller found".into()))?;
        let (mut manager, storage) = self.build(functions, params)?;
        let settle = Duration::from_millis(self.gadget.bind_settle_ms);

        info!("Binding {:?} to {}", functions, udc);
        let udc_name = udc.clone();
        let manager = tokio::task::spawn_blocking(move || {
            // On error the manager is dropped here, removing the partial tree
            manager.setup()?;
            manager.bind(&udc_name, settle)?;
            Ok::<_, crate::error::AppError>(manager)
        })
        .await
        .map_err(|e| ModeError::BindFailed(format!("task join error: {}", e)))?
        .map_err(|e| ModeError::BindFailed(e.to_string()))?;

        let gadget_path = manager.gadget_path().to_path_buf();
        let status = BoundFunctions {
            udc: Some(udc),
            network_ifname: functions
                .contains(UsbFunction::Network)
                .then(|| {
                    EcmFunction::new(0, None, None)
                        .ifname(&gadget_path)
                        .unwrap_or_else(|| self.network.interface.clone())
                }),
            serial_tty: functions
                .contains(UsbFunction::Serial)
                .then(|| AcmFunction::new(0).tty_path(&gadget_path))
                .flatten(),
            hid_device: functions
                .contains(UsbFunction::Hid)
                .then(|| HidKeyboardFunction::new(0).device_path()),
            storage: params.storage.as_ref().map(|s| s.file.clone()),
        };
        *self.status.write() = status;
        *bound = Some(Bound { manager, storage });
        Ok(())
    }

    async fn unbind(&self, timeout: Duration) -> Result<(), ModeError> {
        let mut bound = self.bound.lock().await;
        let Some(mut b) = bound.take() else {
            return Ok(());
        };

        let task = tokio::task::spawn_blocking(move || {
            let settled = b.manager.unbind(timeout);
            (b, settled)
        });

        // A write to `UDC` that blocks in the kernel must not hold the switch
        // forever; the task keeps the manager and cleans up when it returns.
        let (b, settled) = match tokio::time::timeout(timeout + UNBIND_TASK_SLACK, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(ModeError::BindFailed(format!("task join error: {}", e))),
            Err(_) => {
                warn!("Unbind task did not return within {:?}", timeout);
                *self.status.write() = BoundFunctions::default();
                return Err(ModeError::UnbindTimeout(timeout.as_millis() as u64));
            }
        };

        // Keep the tree around; the next bind removes it
        *bound = Some(b);
        match settled {
            Ok(true) => {
                *self.status.write() = BoundFunctions::default();
                Ok(())
            }
            Ok(false) => Err(ModeError::UnbindTimeout(timeout.as_millis() as u64)),
            Err(e) => Err(ModeError::BindFailed(format!("unbind failed: {}", e))),
        }
    }

    async fn reconfigure_storage(&self, params: &StorageParams) -> Result<(), ModeError> {
        let bound = self.bound.lock().await;
        let Some(b) = bound.as_ref() else {
            return Err(ModeError::BindFailed("gadget is not bound".into()));
        };
        let Some(msd) = b.storage.as_ref() else {
            return Err(ModeError::BindFailed("bound configuration has no mass storage".into()));
        };

        let lun = LunConfig::disk(params.file.clone(), params.read_only);
        msd.reconfigure_async(b.manager.gadget_path(), &lun)
            .await
            .map_err(|e| ModeError::BindFailed(format!("LUN reconfigure failed: {}", e)))?;

        self.status.write().storage = Some(params.file.clone());
        Ok(())
    }

    fn bound_functions(&self) -> BoundFunctions {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::GadgetMode;
    use std::fs;
    use tempfile::TempDir;

    fn binder(dir: &TempDir) -> ConfigFsBinder {
        let root = dir.path().join("usb_gadget");
        let udc = dir.path().join("udc");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(udc.join("dummy_udc.0")).unwrap();
        let gadget = GadgetConfig {
            bind_settle_ms: 0,
            ..Default::default()
        };
        ConfigFsBinder::with_paths(root, udc, gadget, NetworkConfig::default())
    }

    fn storage(dir: &TempDir, read_only: bool) -> BindParams {
        let file = dir.path().join("usb_storage.img");
        fs::write(&file, vec![0u8; 4096]).unwrap();
        BindParams {
            storage: Some(StorageParams { file, read_only }),
        }
    }

    #[tokio::test]
    async fn test_bind_multi_links_three_functions() {
        let dir = TempDir::new().unwrap();
        let b = binder(&dir);
        let params = storage(&dir, false);

        b.bind(GadgetMode::Multi.functions(), &params).await.unwrap();

        let config = dir.path().join("usb_gadget/vivisect/configs/c.1");
        for f in ["ecm.usb0", "mass_storage.usb0", "acm.usb0"] {
            assert!(config.join(f).symlink_metadata().is_ok(), "{} not linked", f);
        }
        assert!(config.join("hid.usb0").symlink_metadata().is_err());

        let status = b.bound_functions();
        assert_eq!(status.udc.as_deref(), Some("dummy_udc.0"));
        assert_eq!(status.network_ifname.as_deref(), Some("usb0"));
        assert!(status.hid_device.is_none());

        b.unbind(Duration::from_millis(200)).await.unwrap();
        assert!(b.bound_functions().udc.is_none());
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebind_replaces_previous_functions() {
        let dir = TempDir::new().unwrap();
        let b = binder(&dir);

        b.bind(GadgetMode::NetworkOnly.functions(), &BindParams::default())
            .await
            .unwrap();
        b.unbind(Duration::from_millis(200)).await.unwrap();
        b.bind(GadgetMode::HidKeyboard.functions(), &BindParams::default())
            .await
            .unwrap();

        let config = dir.path().join("usb_gadget/vivisect/configs/c.1");
        assert!(config.join("hid.usb0").symlink_metadata().is_ok());
        assert!(config.join("ecm.usb0").symlink_metadata().is_err());
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_storage_without_backing_file_fails() {
        let dir = TempDir::new().unwrap();
        let b = binder(&dir);
        let err = b
            .bind(GadgetMode::StorageReadOnly.functions(), &BindParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bind_failed");
    }

    #[tokio::test]
    async fn test_reconfigure_storage_in_place() {
        let dir = TempDir::new().unwrap();
        let b = binder(&dir);
        let params = storage(&dir, false);
        b.bind(GadgetMode::Multi.functions(), &params).await.unwrap();

        let mut ro = params.storage.clone().unwrap();
        ro.read_only = true;
        b.reconfigure_storage(&ro).await.unwrap();

        let lun = dir
            .path()
            .join("usb_gadget/vivisect/functions/mass_storage.usb0/lun.0");
        assert_eq!(fs::read_to_string(lun.join("ro")).unwrap(), "1\n");
        b.shutdown().await;
    }
}
