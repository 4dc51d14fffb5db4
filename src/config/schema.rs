use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use typeshare::typeshare;

use crate::gadget::GadgetMode;

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Gadget personality settings
    pub gadget: GadgetConfig,
    /// USB network function settings
    pub network: NetworkConfig,
    /// Mass storage backing image settings
    pub storage: StorageConfig,
    /// Connection-triggered capture settings
    pub capture: CaptureConfig,
    /// Evidence synchronizer settings
    pub sync: SyncConfig,
    /// Keystroke injection settings
    pub hid: HidConfig,
    /// Web server settings
    pub web: WebConfig,
    /// Output directories
    pub output: OutputConfig,
}

/// USB device descriptor configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UsbDescriptorConfig {
    /// USB Vendor ID (e.g., 0x1d6b)
    pub vendor_id: u16,
    /// USB Product ID (e.g., 0x0104)
    pub product_id: u16,
    /// Manufacturer string
    pub manufacturer: String,
    /// Product string
    pub product: String,
    /// Serial number (optional, a fixed default is used if not set)
    pub serial_number: Option<String>,
}

impl Default for UsbDescriptorConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x1d6b,  // Linux Foundation
            product_id: 0x0104, // Multifunction Composite Gadget
            manufacturer: "Vivisect".to_string(),
            product: "Vivisect USB Device".to_string(),
            serial_number: None,
        }
    }
}

/// Gadget personality configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// Gadget directory name under ConfigFS
    pub name: String,
    /// UDC name (auto-detected when unset)
    pub udc: Option<String>,
    /// Device descriptor
    pub descriptor: UsbDescriptorConfig,
    /// Mode applied at startup
    pub startup_mode: GadgetMode,
    /// Read-only flag applied with the startup mode
    pub startup_read_only: bool,
    /// Upper bound for the UDC to settle after unbind
    pub unbind_timeout_ms: u64,
    /// Delay after bind before the functions are considered ready
    pub bind_settle_ms: u64,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            name: "vivisect".to_string(),
            udc: None,
            descriptor: UsbDescriptorConfig::default(),
            startup_mode: GadgetMode::Multi,
            startup_read_only: false,
            unbind_timeout_ms: 3000,
            bind_settle_ms: 300,
        }
    }
}

/// USB network function configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Device-side interface created by the network function
    pub interface: String,
    /// Static address assigned to the device side
    pub device_ip: String,
    /// Address the host side is expected to use
    pub host_ip: String,
    /// Prefix length of the point-to-point subnet
    pub prefix_len: u8,
    /// MAC address of the device side (kernel picks one when unset)
    pub dev_addr: Option<String>,
    /// MAC address presented to the host (kernel picks one when unset)
    pub host_addr: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "usb0".to_string(),
            device_ip: "10.55.0.2".to_string(),
            host_ip: "10.55.0.1".to_string(),
            prefix_len: 24,
            dev_addr: None,
            host_addr: None,
        }
    }
}

/// Filesystem used on the backing image
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreFilesystem {
    #[default]
    Vfat,
    Ext4,
}

impl StoreFilesystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vfat => "vfat",
            Self::Ext4 => "ext4",
        }
    }
}

/// Mass storage backing image configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backing image path
    pub image_path: String,
    /// Private mount point used for local maintenance
    pub mount_point: String,
    /// Image size in megabytes (used when the image is created)
    pub size_mb: u64,
    /// Volume label
    pub label: String,
    /// Filesystem
    pub filesystem: StoreFilesystem,
    /// Create the image at startup when it does not exist
    pub create_if_missing: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_path: "/var/lib/vivisect/usb_storage.img".to_string(),
            mount_point: "/mnt/vivisect_usb".to_string(),
            size_mb: 512,
            label: "VIVISECT".to_string(),
            filesystem: StoreFilesystem::Vfat,
            create_if_missing: true,
        }
    }
}

impl StorageConfig {
    pub fn image_path(&self) -> PathBuf {
        PathBuf::from(&self.image_path)
    }

    pub fn mount_point(&self) -> PathBuf {
        PathBuf::from(&self.mount_point)
    }
}

/// Connection-triggered capture configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Run the capture orchestrator
    pub enabled: bool,
    /// Link poll interval
    pub poll_interval_ms: u64,
    /// Packet capture binary
    pub tool: String,
    /// Extra arguments appended after the interface/output arguments
    pub extra_args: Vec<String>,
    /// Grace period between SIGINT and a forced kill
    pub stop_grace_ms: u64,
    /// Trigger the full collection workflow on each new connection
    pub auto_collect: bool,
    /// Collection command; `{case_id}` and `{output_dir}` are substituted
    pub collect_command: Vec<String>,
    /// Number of finished sessions kept in memory
    pub history_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2000,
            tool: "tcpdump".to_string(),
            extra_args: vec!["-n".to_string()],
            stop_grace_ms: 3000,
            auto_collect: false,
            collect_command: vec![
                "vivisect".to_string(),
                "collect".to_string(),
                "--case-id".to_string(),
                "{case_id}".to_string(),
                "--output".to_string(),
                "{output_dir}".to_string(),
            ],
            history_size: 50,
        }
    }
}

/// One synchronizer source directory and the category it lands in
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSource {
    /// Source directory (relative paths resolve against the output directory)
    pub path: String,
    /// Destination directory name inside the backing store
    pub category: String,
}

/// Evidence synchronizer configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source directories
    pub sources: Vec<SyncSource>,
    /// Glob patterns excluded from the copy
    pub exclude: Vec<String>,
    /// Periodic sync interval (disabled when unset)
    pub interval_secs: Option<u64>,
    /// Sync after every finished capture session
    pub after_capture: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SyncSource {
                    path: "reports".to_string(),
                    category: "reports".to_string(),
                },
                SyncSource {
                    path: "evidence".to_string(),
                    category: "evidence".to_string(),
                },
            ],
            exclude: vec!["*.img".to_string(), "*.dd".to_string()],
            interval_secs: None,
            after_capture: false,
        }
    }
}

/// Keystroke injection configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    /// Keyboard gadget device
    pub keyboard_device: String,
    /// Directory holding payload documents
    pub payload_dir: String,
    /// Minimum time each report is held
    pub key_dwell_ms: u64,
    /// How long to wait for the keyboard device after a bind
    pub device_wait_ms: u64,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            keyboard_device: "/dev/hidg0".to_string(),
            payload_dir: "/var/lib/vivisect/payloads".to_string(),
            key_dwell_ms: 10,
            device_wait_ms: 2000,
        }
    }
}

/// Output directory layout
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root for captures, reports and evidence
    pub output_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: "/var/lib/vivisect/output".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.output_dir().join("captures")
    }
}

/// Web server configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_field_layout() {
        let config = AppConfig::default();
        assert_eq!(config.network.interface, "usb0");
        assert_eq!(config.network.device_ip, "10.55.0.2");
        assert_eq!(config.storage.label, "VIVISECT");
        assert_eq!(config.sync.exclude, vec!["*.img", "*.dd"]);
        assert_eq!(config.capture.poll_interval_ms, 2000);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"network": {"interface": "usb1"}, "storage": {"filesystem": "ext4"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.network.interface, "usb1");
        assert_eq!(config.network.prefix_len, 24);
        assert_eq!(config.storage.filesystem, StoreFilesystem::Ext4);
        assert_eq!(config.gadget.startup_mode, GadgetMode::Multi);
    }
}
