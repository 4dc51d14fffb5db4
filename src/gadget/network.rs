//! Device-side configuration of the USB network interface

use async_trait::async_trait;
use tracing::info;

use crate::config::NetworkConfig;
use crate::utils::run_command;

/// Brings the gadget network interface up with its static address
#[async_trait]
pub trait NetworkConfigurator: Send + Sync {
    async fn configure(&self, config: &NetworkConfig) -> Result<(), String>;
}

/// `ip(8)` based implementation
#[derive(Debug, Default)]
pub struct IpCommandConfigurator;

#[async_trait]
impl NetworkConfigurator for IpCommandConfigurator {
    async fn configure(&self, config: &NetworkConfig) -> Result<(), String> {
        let iface = config.interface.as_str();
        let address = format!("{}/{}", config.device_ip, config.prefix_len);

        run_command("ip", &["link", "set", iface, "up"]).await?;
        // `replace` keeps this idempotent across rebinds
        run_command("ip", &["addr", "replace", &address, "dev", iface]).await?;

        info!("Configured {} with {}", iface, address);
        Ok(())
    }
}
