//! In-process fakes for the hardware and subprocess seams

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::capture::{
    CaptureError, CaptureLauncher, CaptureProcess, CollectionTrigger, HostProbe, HostSnapshot,
    LinkProbe, LinkStatus, NeighborEntry,
};
use crate::config::{NetworkConfig, StorageConfig};
use crate::events::EventBus;
use crate::gadget::{
    BindParams, BoundFunctions, FunctionSet, ModeError, NetworkConfigurator, StorageParams,
    UdcBinder, UsbFunction,
};
use crate::payload::{HidError, KeyboardReport, ReportSink};
use crate::store::{BackingStoreManager, Mounter, StoreError};

/// Store over a 1 KiB image in `dir` with a fake mounter
pub fn test_store(
    dir: &TempDir,
    events: Arc<EventBus>,
) -> (Arc<BackingStoreManager>, Arc<FakeMounter>) {
    let image = dir.path().join("usb_storage.img");
    std::fs::write(&image, vec![0u8; 1024]).unwrap();
    let config = StorageConfig {
        image_path: image.to_string_lossy().into_owned(),
        mount_point: dir.path().join("mnt").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let mounter = Arc::new(FakeMounter::default());
    let store = Arc::new(BackingStoreManager::new(config, mounter.clone(), events));
    (store, mounter)
}

/// Treats the mount point as a plain directory
#[derive(Default)]
pub struct FakeMounter {
    mounted: Mutex<HashSet<PathBuf>>,
    syncs: AtomicUsize,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
}

impl FakeMounter {
    pub fn fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn mount(&self, _image: &Path, mount_point: &Path) -> Result<(), StoreError> {
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(StoreError::MountFailed("fake mount failure".into()));
        }
        std::fs::create_dir_all(mount_point).unwrap();
        self.mounted.lock().insert(mount_point.to_path_buf());
        Ok(())
    }

    async fn sync(&self, _mount_point: &Path) -> Result<(), StoreError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), StoreError> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(StoreError::MountFailed("target is busy".into()));
        }
        self.mounted.lock().remove(mount_point);
        Ok(())
    }

    async fn is_mounted(&self, mount_point: &Path) -> bool {
        self.mounted.lock().contains(mount_point)
    }
}

/// Records binds; failures and latency are switchable
#[derive(Default)]
pub struct FakeBinder {
    bound: Mutex<Option<FunctionSet>>,
    last_storage: Mutex<Option<StorageParams>>,
    binds: AtomicUsize,
    unbinds: AtomicUsize,
    reconfigures: AtomicUsize,
    fail_bind: AtomicBool,
    fail_unbind: AtomicBool,
    bind_delay: Mutex<Duration>,
}

impl FakeBinder {
    pub fn fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unbind(&self, fail: bool) {
        self.fail_unbind.store(fail, Ordering::SeqCst);
    }

    pub fn set_bind_delay(&self, delay: Duration) {
        *self.bind_delay.lock() = delay;
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn unbind_count(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    pub fn reconfigure_count(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn last_storage(&self) -> Option<StorageParams> {
        self.last_storage.lock().clone()
    }
}

#[async_trait]
impl UdcBinder for FakeBinder {
    async fn bind(&self, functions: FunctionSet, params: &BindParams) -> Result<(), ModeError> {
        let delay = *self.bind_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(ModeError::BindFailed("fake bind failure".into()));
        }
        self.binds.fetch_add(1, Ordering::SeqCst);
        *self.bound.lock() = Some(functions);
        *self.last_storage.lock() = params.storage.clone();
        Ok(())
    }

    async fn unbind(&self, timeout: Duration) -> Result<(), ModeError> {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        if self.fail_unbind.load(Ordering::SeqCst) {
            return Err(ModeError::UnbindTimeout(timeout.as_millis() as u64));
        }
        *self.bound.lock() = None;
        Ok(())
    }

    async fn reconfigure_storage(&self, params: &StorageParams) -> Result<(), ModeError> {
        let bound = *self.bound.lock();
        match bound {
            Some(set) if set.contains(UsbFunction::MassStorage) => {
                self.reconfigures.fetch_add(1, Ordering::SeqCst);
                *self.last_storage.lock() = Some(params.clone());
                Ok(())
            }
            _ => Err(ModeError::BindFailed("no mass storage bound".into())),
        }
    }

    fn bound_functions(&self) -> BoundFunctions {
        let bound = *self.bound.lock();
        let Some(set) = bound else {
            return BoundFunctions::default();
        };
        BoundFunctions {
            udc: Some("fake_udc.0".to_string()),
            network_ifname: set.contains(UsbFunction::Network).then(|| "usb0".to_string()),
            serial_tty: set
                .contains(UsbFunction::Serial)
                .then(|| PathBuf::from("/dev/ttyGS0")),
            hid_device: set
                .contains(UsbFunction::Hid)
                .then(|| PathBuf::from("/dev/hidg0")),
            storage: self.last_storage.lock().as_ref().map(|s| s.file.clone()),
        }
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    configured: AtomicUsize,
    fail: AtomicBool,
}

impl FakeNetwork {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn configure_count(&self) -> usize {
        self.configured.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkConfigurator for FakeNetwork {
    async fn configure(&self, config: &NetworkConfig) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(format!("Cannot find device \"{}\"", config.interface));
        }
        self.configured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Link state set directly by the test; starts down
pub struct FakeLinkProbe {
    status: Mutex<Result<LinkStatus, String>>,
}

impl Default for FakeLinkProbe {
    fn default() -> Self {
        Self {
            status: Mutex::new(Ok(LinkStatus::default())),
        }
    }
}

impl FakeLinkProbe {
    pub fn set(&self, up: bool, rx_bytes: u64, tx_bytes: u64) {
        *self.status.lock() = Ok(LinkStatus {
            up,
            rx_bytes,
            tx_bytes,
        });
    }

    pub fn set_error(&self, error: &str) {
        *self.status.lock() = Err(error.to_string());
    }
}

#[async_trait]
impl LinkProbe for FakeLinkProbe {
    async fn probe(&self, _interface: &str) -> Result<LinkStatus, String> {
        self.status.lock().clone()
    }
}

/// Reports one neighbour per snapshot and remembers the interfaces asked for
#[derive(Default)]
pub struct FakeHostProbe {
    interfaces: Mutex<Vec<String>>,
}

impl FakeHostProbe {
    pub fn interfaces(&self) -> Vec<String> {
        self.interfaces.lock().clone()
    }
}

#[async_trait]
impl HostProbe for FakeHostProbe {
    async fn snapshot(&self, interface: &str) -> HostSnapshot {
        self.interfaces.lock().push(interface.to_string());
        HostSnapshot {
            taken_at: chrono::Utc::now(),
            neighbors: vec![NeighborEntry {
                ip: "192.168.7.1".to_string(),
                mac: Some("02:00:00:00:00:02".to_string()),
                state: Some("REACHABLE".to_string()),
            }],
            connections: Vec::new(),
            errors: Vec::new(),
        }
    }
}

type ExitCell = Arc<Mutex<Option<Option<i32>>>>;

/// Hands out processes whose exit the test controls
#[derive(Default)]
pub struct FakeLauncher {
    starts: AtomicUsize,
    stops: Arc<AtomicUsize>,
    fail_start: AtomicBool,
    last: Mutex<Option<ExitCell>>,
}

impl FakeLauncher {
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the most recently started process exit with `code`
    pub fn exit_last(&self, code: Option<i32>) {
        if let Some(cell) = self.last.lock().as_ref() {
            *cell.lock() = Some(code);
        }
    }
}

#[async_trait]
impl CaptureLauncher for FakeLauncher {
    async fn start(
        &self,
        _interface: &str,
        _output: &Path,
    ) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CaptureError::SubprocessStartFailed(
                "tcpdump: usb0: No such device exists".into(),
            ));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let exit: ExitCell = Arc::default();
        *self.last.lock() = Some(exit.clone());
        Ok(Box::new(FakeProcess {
            exit,
            stops: self.stops.clone(),
        }))
    }
}

struct FakeProcess {
    exit: ExitCell,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn try_exit(&mut self) -> Option<Option<i32>> {
        *self.exit.lock()
    }

    async fn stop(&mut self, _grace: Duration) -> Option<i32> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut exit = self.exit.lock();
        *exit.get_or_insert(Some(0))
    }
}

/// Remembers which cases were handed to collection
#[derive(Default)]
pub struct FakeTrigger {
    cases: Mutex<Vec<String>>,
}

impl FakeTrigger {
    pub fn case_ids(&self) -> Vec<String> {
        self.cases.lock().clone()
    }
}

impl CollectionTrigger for FakeTrigger {
    fn trigger(&self, case_id: &str, _output_dir: &Path) -> Result<(), String> {
        self.cases.lock().push(case_id.to_string());
        Ok(())
    }
}

/// Keeps every report instead of writing a device
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(KeyboardReport, tokio::time::Instant)>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<KeyboardReport> {
        self.reports.lock().iter().map(|(report, _)| *report).collect()
    }

    /// Reports with their write time relative to the first one
    pub fn timeline(&self) -> Vec<(KeyboardReport, Duration)> {
        let reports = self.reports.lock();
        let Some((_, first)) = reports.first().copied() else {
            return Vec::new();
        };
        reports
            .iter()
            .map(|(report, at)| (*report, at.duration_since(first)))
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn open(&self, _device: &Path, _timeout: Duration) -> Result<(), HidError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_report(&self, report: &KeyboardReport) -> std::io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::from_raw_os_error(libc::ESHUTDOWN));
        }
        self.reports
            .lock()
            .push((*report, tokio::time::Instant::now()));
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
