//! Link state of the gadget network interface

use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub up: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn probe(&self, interface: &str) -> Result<LinkStatus, String>;
}

/// Reads `/sys/class/net/<if>/operstate` and the byte counters
pub struct SysfsLinkProbe {
    net_class_dir: PathBuf,
}

impl SysfsLinkProbe {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/sys/class/net"))
    }

    pub fn with_root(net_class_dir: PathBuf) -> Self {
        Self { net_class_dir }
    }
}

impl Default for SysfsLinkProbe {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_counter(path: PathBuf) -> u64 {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl LinkProbe for SysfsLinkProbe {
    async fn probe(&self, interface: &str) -> Result<LinkStatus, String> {
        let dir = self.net_class_dir.join(interface);
        let operstate = tokio::fs::read_to_string(dir.join("operstate"))
            .await
            .map_err(|e| format!("{}: {}", interface, e))?;

        // Gadget ECM links often report "unknown" while carrying traffic
        let state = operstate.trim();
        let up = state == "up" || (state == "unknown" && carrier(&dir).await);

        Ok(LinkStatus {
            up,
            rx_bytes: read_counter(dir.join("statistics/rx_bytes")).await,
            tx_bytes: read_counter(dir.join("statistics/tx_bytes")).await,
        })
    }
}

async fn carrier(dir: &std::path::Path) -> bool {
    tokio::fs::read_to_string(dir.join("carrier"))
        .await
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}
