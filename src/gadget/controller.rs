//! Gadget personality controller
//!
//! Sole owner of the UDC binding. A switch always tears down the current
//! configuration before binding the next one, so the host never sees two
//! personalities at once; the only exception is flipping the read-only flag
//! of the current mode, which re-inserts the LUN in place.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::binder::{BindParams, StorageParams, UdcBinder};
use super::mode::{GadgetMode, UsbFunction};
use super::network::NetworkConfigurator;
use super::types::{ModeError, ModeSnapshot};
use crate::config::{GadgetConfig, NetworkConfig};
use crate::events::{EventBus, SystemEvent};
use crate::store::BackingStoreManager;

pub struct GadgetController {
    binder: Arc<dyn UdcBinder>,
    network: Arc<dyn NetworkConfigurator>,
    store: Arc<BackingStoreManager>,
    events: Arc<EventBus>,
    gadget_config: GadgetConfig,
    network_config: NetworkConfig,
    /// Held for the whole switch; contention means `Busy`
    switch_lock: Mutex<()>,
    snapshot: RwLock<ModeSnapshot>,
}

impl GadgetController {
    pub fn new(
        binder: Arc<dyn UdcBinder>,
        network: Arc<dyn NetworkConfigurator>,
        store: Arc<BackingStoreManager>,
        events: Arc<EventBus>,
        gadget_config: GadgetConfig,
        network_config: NetworkConfig,
    ) -> Self {
        Self {
            binder,
            network,
            store,
            events,
            gadget_config,
            network_config,
            switch_lock: Mutex::new(()),
            snapshot: RwLock::new(ModeSnapshot::default()),
        }
    }

    /// Last successfully applied mode
    pub fn current_mode(&self) -> GadgetMode {
        self.snapshot.read().mode
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.snapshot.read().clone()
    }

    pub fn binder(&self) -> &Arc<dyn UdcBinder> {
        &self.binder
    }

    fn unbind_timeout(&self) -> Duration {
        Duration::from_millis(self.gadget_config.unbind_timeout_ms)
    }

    /// Enter `target`; `read_only` only matters for `Multi`
    pub async fn switch_mode(&self, target: GadgetMode, read_only: bool) -> Result<(), ModeError> {
        let Ok(_guard) = self.switch_lock.try_lock() else {
            let err = ModeError::Busy;
            self.publish_failure(target, &err);
            return Err(err);
        };

        self.snapshot.write().switching = true;
        let result = self.apply(target, read_only).await;

        {
            let mut snapshot = self.snapshot.write();
            snapshot.switching = false;
            snapshot.last_error = result.as_ref().err().map(|e| e.to_string());
        }

        match &result {
            Ok(()) => {}
            Err(e) => {
                warn!("Switch to {} failed: {}", target, e);
                self.publish_failure(target, e);
            }
        }
        result
    }

    async fn apply(&self, target: GadgetMode, read_only: bool) -> Result<(), ModeError> {
        let current = self.snapshot();
        let read_only = target.effective_read_only(read_only);
        let functions = target.functions();

        if target == current.mode {
            if read_only == current.read_only {
                debug!("Already in {} (read_only={})", target, read_only);
                return Ok(());
            }
            if functions.contains(UsbFunction::MassStorage) {
                return self.reconfigure_in_place(target, read_only).await;
            }
        }

        info!("Switching gadget {} -> {} (read_only={})", current.mode, target, read_only);
        let had_storage = current.functions().contains(UsbFunction::MassStorage);
        let wants_storage = functions.contains(UsbFunction::MassStorage);

        if wants_storage {
            self.store.prepare_for_exposure().await?;
        }

        if let Err(e) = self.binder.unbind(self.unbind_timeout()).await {
            // Hardware state unknown; only keep a reservation the old mode held
            if !had_storage {
                self.store.withdraw_exposure().await;
            }
            self.set_unbound();
            return Err(e);
        }

        // Unbound before the reservation drops; a storage mode never
        // shows over a free store
        self.set_unbound();

        if !wants_storage {
            self.store.withdraw_exposure().await;
        }

        if functions.is_empty() {
            info!("Gadget unbound");
            return Ok(());
        }

        let params = BindParams {
            storage: wants_storage.then(|| StorageParams {
                file: self.store.image_path(),
                read_only,
            }),
        };
        if let Err(e) = self.binder.bind(functions, &params).await {
            self.store.withdraw_exposure().await;
            self.set_unbound();
            return Err(e);
        }

        if functions.contains(UsbFunction::Network) {
            let mut net = self.network_config.clone();
            if let Some(ifname) = self.binder.bound_functions().network_ifname {
                net.interface = ifname;
            }
            if let Err(e) = self.network.configure(&net).await {
                self.teardown_after_failure().await;
                return Err(ModeError::NetworkConfigFailed(e));
            }
        }

        {
            let mut snapshot = self.snapshot.write();
            snapshot.mode = target;
            snapshot.read_only = read_only;
            snapshot.generation += 1;
        }
        info!("Gadget now in {} mode", target);
        self.publish_changed();
        Ok(())
    }

    /// Flip the LUN's `ro` without unbinding; other functions stay up
    async fn reconfigure_in_place(&self, mode: GadgetMode, read_only: bool) -> Result<(), ModeError> {
        info!("Reconfiguring {} storage in place (read_only={})", mode, read_only);
        let params = StorageParams {
            file: self.store.image_path(),
            read_only,
        };

        if let Err(e) = self.binder.reconfigure_storage(&params).await {
            self.teardown_after_failure().await;
            return Err(match e {
                ModeError::BindFailed(msg) => ModeError::BindFailed(msg),
                other => ModeError::BindFailed(other.to_string()),
            });
        }

        self.snapshot.write().read_only = read_only;
        self.publish_changed();
        Ok(())
    }

    /// Best-effort unbind after a failure past the bind step
    async fn teardown_after_failure(&self) {
        match self.binder.unbind(self.unbind_timeout()).await {
            Ok(()) => self.store.withdraw_exposure().await,
            Err(e) => warn!("Unbind after failed switch also failed: {}", e),
        }
        self.set_unbound();
    }

    /// Record `Unbound`, publishing only when the mode actually changed
    fn set_unbound(&self) {
        {
            let mut snapshot = self.snapshot.write();
            if snapshot.mode == GadgetMode::Unbound {
                return;
            }
            snapshot.mode = GadgetMode::Unbound;
            snapshot.read_only = false;
        }
        self.publish_changed();
    }

    fn publish_changed(&self) {
        let snapshot = self.snapshot.read().clone();
        self.events.publish(SystemEvent::GadgetModeChanged {
            mode: snapshot.mode,
            read_only: snapshot.read_only,
            generation: snapshot.generation,
        });
    }

    fn publish_failure(&self, target: GadgetMode, error: &ModeError) {
        self.events.publish(SystemEvent::GadgetModeFailed {
            target,
            error_code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    /// Unbind and release any storage exposure
    ///
    /// Waits for an in-flight switch instead of failing with `Busy`.
    pub async fn shutdown(&self) {
        let _guard = self.switch_lock.lock().await;
        info!("Shutting down gadget controller");

        match self.binder.unbind(self.unbind_timeout()).await {
            Ok(()) => self.store.withdraw_exposure().await,
            Err(e) => warn!("Unbind during shutdown failed: {}", e),
        }
        self.set_unbound();
    }
}
