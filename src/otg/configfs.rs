//! ConfigFS and UDC sysfs file operations

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// UDC class directory
pub const UDC_CLASS_PATH: &str = "/sys/class/udc";

/// Default gadget name
pub const DEFAULT_GADGET_NAME: &str = "vivisect";

/// USB Vendor ID (Linux Foundation) - default value
pub const DEFAULT_USB_VENDOR_ID: u16 = 0x1d6b;

/// USB Product ID (Multifunction Composite Gadget) - default value
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x0104;

/// USB device version - default value
pub const DEFAULT_USB_BCD_DEVICE: u16 = 0x0100;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

fn fs_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::Internal(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// List UDC names under `class_dir`, sorted for a stable pick
pub fn list_udcs(class_dir: &Path) -> Vec<String> {
    let mut udcs: Vec<String> = match fs::read_dir(class_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    udcs.sort();
    udcs
}

/// Resolve the UDC to bind: the configured name if present, else the first one found
pub fn resolve_udc(class_dir: &Path, preferred: Option<&str>) -> Option<String> {
    let udcs = list_udcs(class_dir);
    match preferred.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) if udcs.iter().any(|u| u == name) => Some(name.to_string()),
        Some(_) => None,
        None => udcs.into_iter().next(),
    }
}

/// Read `<class_dir>/<udc>/state` ("configured", "not attached", ...)
pub fn udc_state(class_dir: &Path, udc: &str) -> Option<String> {
    fs::read_to_string(class_dir.join(udc).join("state"))
        .ok()
        .map(|s| s.trim().to_lowercase())
}

/// Write a sysfs/configfs attribute
///
/// The kernel consumes an attribute on the first write(), so the value and
/// its trailing newline go out in a single syscall. O_TRUNC is avoided
/// because write-only attributes such as `forced_eject` reject it.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| fs_error("open", path, e))?;

    let mut buf = Vec::with_capacity(content.len() + 1);
    buf.extend_from_slice(content.as_bytes());
    if !content.ends_with('\n') {
        buf.push(b'\n');
    }

    file.write_all(&buf)
        .map_err(|e| fs_error("write to", path, e))?;
    file.flush().map_err(|e| fs_error("flush", path, e))
}

/// Write a binary attribute (report descriptors)
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| fs_error("create", path, e))?;
    file.write_all(data)
        .map_err(|e| fs_error("write to", path, e))
}

/// Read an attribute, trimmed
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| fs_error("read", path, e))
}

pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| fs_error("create directory", path, e))
}

/// Remove a directory if it exists (configfs directories are removed with rmdir)
pub fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir(path).map_err(|e| fs_error("remove directory", path, e))?;
    }
    Ok(())
}

/// Remove a file or symlink if it exists
pub fn remove_file(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).map_err(|e| fs_error("remove", path, e))?;
    }
    Ok(())
}

pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        AppError::Internal(format!(
            "Failed to create symlink {} -> {}: {}",
            dest.display(),
            src.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_appends_newline_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attr");

        write_file(&path, "0x1d6b").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0x1d6b\n");

        write_file(&path, "1\n").unwrap();
        assert_eq!(read_file(&path).unwrap(), "1");
    }

    #[test]
    fn test_resolve_udc() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_udc(dir.path(), None), None);

        fs::create_dir(dir.path().join("fe980000.usb")).unwrap();
        fs::create_dir(dir.path().join("dummy_udc.0")).unwrap();

        assert_eq!(
            resolve_udc(dir.path(), None),
            Some("dummy_udc.0".to_string())
        );
        assert_eq!(
            resolve_udc(dir.path(), Some("fe980000.usb")),
            Some("fe980000.usb".to_string())
        );
        assert_eq!(resolve_udc(dir.path(), Some("missing.usb")), None);
    }

    #[test]
    fn test_udc_state() {
        let dir = TempDir::new().unwrap();
        let udc = dir.path().join("fe980000.usb");
        fs::create_dir(&udc).unwrap();
        fs::write(udc.join("state"), "Configured\n").unwrap();

        assert_eq!(
            udc_state(dir.path(), "fe980000.usb").as_deref(),
            Some("configured")
        );
        assert_eq!(udc_state(dir.path(), "other"), None);
    }

    #[test]
    fn test_remove_file_handles_dangling_symlink() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        create_symlink(&dir.path().join("missing"), &link).unwrap();
        remove_file(&link).unwrap();
        assert!(link.symlink_metadata().is_err());
    }
}
