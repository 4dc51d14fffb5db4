//! Backing store ownership
//!
//! The image is either exposed to the host through the mass storage LUN or
//! loop-mounted locally, never both. Every transition goes through the state
//! mutex; the parking_lot mirror serves non-blocking status reads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::image;
use super::mounter::Mounter;
use super::types::{MountState, StoreError, StoreInfo};
use crate::config::StorageConfig;
use crate::events::{EventBus, SystemEvent};

pub struct BackingStoreManager {
    config: StorageConfig,
    mounter: Arc<dyn Mounter>,
    events: Arc<EventBus>,
    state: Mutex<MountState>,
    observed: parking_lot::RwLock<MountState>,
    /// Still mounted, but the handle was consumed by a failed release; the
    /// next acquire or exposure retries the unmount
    orphaned: AtomicBool,
}

/// Proof of a local mount, handed to the synchronizer
///
/// Give it back with `BackingStoreManager::release_local`. A dropped handle
/// schedules the release on the runtime.
pub struct LocalMount {
    store: Arc<BackingStoreManager>,
    mount_point: PathBuf,
    released: bool,
}

impl LocalMount {
    pub fn path(&self) -> &Path {
        &self.mount_point
    }
}

impl Drop for LocalMount {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("Local mount dropped without release, releasing in background");
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_inner().await {
                        error!("Background release failed: {}", e);
                    }
                });
            }
            Err(_) => error!("No runtime to release the local mount; run recovery at next start"),
        }
    }
}

impl BackingStoreManager {
    pub fn new(config: StorageConfig, mounter: Arc<dyn Mounter>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            mounter,
            events,
            state: Mutex::new(MountState::Unmounted),
            observed: parking_lot::RwLock::new(MountState::Unmounted),
            orphaned: AtomicBool::new(false),
        }
    }

    pub fn image_path(&self) -> PathBuf {
        self.config.image_path()
    }

    pub fn mount_point(&self) -> PathBuf {
        self.config.mount_point()
    }

    /// Left next to the image while it is mounted locally, so a crash
    /// mid-sync is detected at the next start
    fn marker_path(&self) -> PathBuf {
        let mut name = self.image_path().into_os_string();
        name.push(".mounted");
        PathBuf::from(name)
    }

    /// Last committed state; never blocks
    pub fn state(&self) -> MountState {
        *self.observed.read()
    }

    fn commit(&self, guard: &mut MountState, next: MountState) {
        if *guard == next {
            return;
        }
        debug!("Backing store {:?} -> {:?}", *guard, next);
        *guard = next;
        *self.observed.write() = next;
        self.events.publish(SystemEvent::StoreStateChanged { state: next });
    }

    /// Reserve the image for the mass storage LUN
    pub async fn prepare_for_exposure(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.reclaim_orphan(&mut state).await?;
        match *state {
            MountState::MountedLocal => Err(StoreError::StoreBusy(
                "backing store is mounted locally".to_string(),
            )),
            MountState::ExposedToHost => Ok(()),
            MountState::Unmounted => {
                let path = self.image_path();
                if !path.exists() {
                    return Err(StoreError::FilesystemError(format!(
                        "backing image {} does not exist",
                        path.display()
                    )));
                }
                self.commit(&mut state, MountState::ExposedToHost);
                Ok(())
            }
        }
    }

    /// Drop the host reservation; no-op unless exposed
    pub async fn withdraw_exposure(&self) {
        let mut state = self.state.lock().await;
        if *state == MountState::ExposedToHost {
            self.commit(&mut state, MountState::Unmounted);
        }
    }

    /// Loop-mount the image for local use
    pub async fn acquire_local(self: &Arc<Self>) -> Result<LocalMount, StoreError> {
        let mut state = self.state.lock().await;
        self.reclaim_orphan(&mut state).await?;
        match *state {
            MountState::ExposedToHost => {
                return Err(StoreError::StoreBusy(
                    "backing store is exposed to the host".to_string(),
                ))
            }
            MountState::MountedLocal => {
                return Err(StoreError::StoreBusy(
                    "backing store is already mounted locally".to_string(),
                ))
            }
            MountState::Unmounted => {}
        }

        let image = self.image_path();
        if !image.exists() {
            return Err(StoreError::FilesystemError(format!(
                "backing image {} does not exist",
                image.display()
            )));
        }

        let mount_point = self.mount_point();
        self.mounter.mount(&image, &mount_point).await?;

        if let Err(e) = tokio::fs::write(self.marker_path(), b"").await {
            warn!("Could not write mount marker: {}", e);
        }
        self.commit(&mut state, MountState::MountedLocal);
        info!("Backing store mounted at {}", mount_point.display());

        Ok(LocalMount {
            store: self.clone(),
            mount_point,
            released: false,
        })
    }

    /// Flush and unmount
    ///
    /// On failure the store stays `MountedLocal` and the unmount is retried
    /// by the next `acquire_local` or `prepare_for_exposure`.
    pub async fn release_local(&self, mut mount: LocalMount) -> Result<(), StoreError> {
        mount.released = true;
        self.release_inner().await
    }

    async fn release_inner(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let result = self.unmount_locked(&mut state).await;
        if result.is_err() {
            self.orphaned.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn unmount_locked(&self, state: &mut MountState) -> Result<(), StoreError> {
        if *state != MountState::MountedLocal {
            return Ok(());
        }

        let mount_point = self.mount_point();
        if let Err(e) = self.mounter.sync(&mount_point).await {
            warn!("Flush before unmount failed: {}", e);
        }
        // Still mounted on failure; exposing it now would corrupt the image
        self.mounter.unmount(&mount_point).await?;

        let _ = tokio::fs::remove_file(self.marker_path()).await;
        self.orphaned.store(false, Ordering::SeqCst);
        self.commit(state, MountState::Unmounted);
        info!("Backing store unmounted");
        Ok(())
    }

    /// Finish a release whose handle is gone
    async fn reclaim_orphan(&self, state: &mut MountState) -> Result<(), StoreError> {
        if *state != MountState::MountedLocal || !self.orphaned.load(Ordering::SeqCst) {
            return Ok(());
        }
        warn!("Retrying unmount of an unreleased local mount");
        self.unmount_locked(state).await.map_err(|e| {
            StoreError::StoreBusy(format!("local mount could not be released: {}", e))
        })
    }

    /// Startup check for a local mount left behind by a crash
    pub async fn recover(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let marker = self.marker_path();
        let mount_point = self.mount_point();

        if marker.exists() {
            if self.mounter.is_mounted(&mount_point).await {
                warn!(
                    "Found stale local mount at {}, unmounting",
                    mount_point.display()
                );
                let _ = self.mounter.sync(&mount_point).await;
                self.mounter.unmount(&mount_point).await?;
            } else {
                debug!("Clearing stale mount marker");
            }
            let _ = tokio::fs::remove_file(&marker).await;
        }

        self.orphaned.store(false, Ordering::SeqCst);
        self.commit(&mut state, MountState::Unmounted);
        Ok(())
    }

    /// Create the image if it is missing; `true` when one was created
    pub async fn ensure_image(&self) -> Result<bool, StoreError> {
        // Held so nobody mounts or exposes a half-formatted image
        let _state = self.state.lock().await;
        image::ensure_image(&self.config).await
    }

    pub fn info(&self) -> StoreInfo {
        let path = self.image_path();
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        StoreInfo {
            exists: path.exists(),
            path,
            size_bytes,
            label: self.config.label.clone(),
            filesystem: self.config.filesystem,
            mount_state: self.state(),
            mount_point: self.mount_point(),
        }
    }
}
