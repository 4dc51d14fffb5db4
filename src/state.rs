use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use typeshare::typeshare;

use crate::capture::{CaptureHistory, CaptureOrchestrator, LinkProbe};
use crate::config::ConfigStore;
use crate::events::{EventBus, SystemEvent};
use crate::gadget::{FunctionSet, GadgetController, ModeSnapshot, UsbFunction};
use crate::payload::KeystrokeService;
use crate::store::{BackingStoreManager, MountState, StoreInfo};
use crate::sync::Synchronizer;

/// Network function as seen from the device side
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct NetworkFunctionStatus {
    pub interface: String,
    pub link_up: bool,
    #[typeshare(serialized_as = "number")]
    pub rx_bytes: u64,
    #[typeshare(serialized_as = "number")]
    pub tx_bytes: u64,
    pub device_ip: String,
    pub host_ip: String,
    pub prefix_len: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct StorageFunctionStatus {
    pub exposed: bool,
    pub read_only: bool,
    pub store: StoreInfo,
}

/// Serial console or keyboard node
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct DeviceNodeStatus {
    pub path: PathBuf,
    pub available: bool,
}

/// Mode snapshot plus per-function detail for the bound functions
#[typeshare]
#[derive(Debug, Clone, Serialize)]
pub struct GadgetStatus {
    #[serde(flatten)]
    pub snapshot: ModeSnapshot,
    #[typeshare(serialized_as = "Vec<UsbFunction>")]
    pub functions: FunctionSet,
    pub udc: Option<String>,
    pub network: Option<NetworkFunctionStatus>,
    pub storage: Option<StorageFunctionStatus>,
    pub serial: Option<DeviceNodeStatus>,
    pub hid: Option<DeviceNodeStatus>,
}

/// Application-wide state shared across handlers
///
/// Every long-lived service is owned here; handlers and background tasks
/// only hold `Arc`s to them.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Sole owner of the UDC binding
    pub controller: Arc<GadgetController>,
    pub store: Arc<BackingStoreManager>,
    pub capture: Arc<CaptureOrchestrator>,
    pub history: Arc<CaptureHistory>,
    pub sync: Arc<Synchronizer>,
    pub keystrokes: Arc<KeystrokeService>,
    pub link_probe: Arc<dyn LinkProbe>,
    /// Cancelled on Ctrl+C; background tasks watch it
    pub shutdown: CancellationToken,
    data_dir: PathBuf,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigStore,
        events: Arc<EventBus>,
        controller: Arc<GadgetController>,
        store: Arc<BackingStoreManager>,
        capture: Arc<CaptureOrchestrator>,
        history: Arc<CaptureHistory>,
        sync: Arc<Synchronizer>,
        keystrokes: Arc<KeystrokeService>,
        link_probe: Arc<dyn LinkProbe>,
        shutdown: CancellationToken,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            events,
            controller,
            store,
            capture,
            history,
            sync,
            keystrokes,
            link_probe,
            shutdown,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Current mode, store state and open capture as events, sent to new
    /// WebSocket subscribers
    pub fn snapshot_events(&self) -> Vec<SystemEvent> {
        let snapshot = self.controller.snapshot();
        let mut events = vec![
            SystemEvent::GadgetModeChanged {
                mode: snapshot.mode,
                read_only: snapshot.read_only,
                generation: snapshot.generation,
            },
            SystemEvent::StoreStateChanged {
                state: self.store.state(),
            },
        ];
        if let Some(active) = self.capture.status().active {
            events.push(SystemEvent::CaptureStarted {
                case_id: active.case_id,
                output_path: active.output_path,
            });
        }
        events
    }

    pub async fn gadget_status(&self) -> GadgetStatus {
        let snapshot = self.controller.snapshot();
        let functions = snapshot.functions();
        let bound = self.controller.binder().bound_functions();

        let network = if functions.contains(UsbFunction::Network) {
            let config = self.config.get();
            let interface = bound
                .network_ifname
                .clone()
                .unwrap_or_else(|| config.network.interface.clone());
            let probe = self.link_probe.probe(&interface).await;
            let link = probe.as_ref().ok().cloned().unwrap_or_default();
            Some(NetworkFunctionStatus {
                interface,
                link_up: link.up,
                rx_bytes: link.rx_bytes,
                tx_bytes: link.tx_bytes,
                device_ip: config.network.device_ip.clone(),
                host_ip: config.network.host_ip.clone(),
                prefix_len: config.network.prefix_len,
                error: probe.err(),
            })
        } else {
            None
        };

        let storage = functions
            .contains(UsbFunction::MassStorage)
            .then(|| {
                let store = self.store.info();
                StorageFunctionStatus {
                    exposed: store.mount_state == MountState::ExposedToHost,
                    read_only: snapshot.read_only,
                    store,
                }
            });

        let node = |path: Option<PathBuf>| {
            path.map(|path| DeviceNodeStatus {
                available: path.exists(),
                path,
            })
        };

        GadgetStatus {
            functions,
            udc: bound.udc,
            network,
            storage,
            serial: node(bound.serial_tty),
            hid: node(bound.hid_device),
            snapshot,
        }
    }
}
