//! Keystroke execution against the HID gadget
//!
//! Runs are serialized. Each run is tied to the mode generation it started
//! under and aborts with `DeviceUnavailable` once the gadget is rebound.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::library::PayloadLibrary;
use super::report::{compile, compile_text, report_for, KeyboardReport, RELEASE_REPORT};
use super::types::{ExecutionState, HidError, KeyEvent, PayloadExecution, PayloadSummary};
use crate::config::HidConfig;
use crate::events::{EventBus, SystemEvent};
use crate::gadget::{GadgetController, UsbFunction};
use crate::otg::wait_for_device_nodes;
use crate::utils::LogThrottler;

/// Attempts per report while the endpoint reports EAGAIN
const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Destination for keyboard reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Wait up to `timeout` for `device` and open it
    async fn open(&self, device: &Path, timeout: Duration) -> Result<(), HidError>;

    fn write_report(&self, report: &KeyboardReport) -> std::io::Result<()>;

    fn close(&self);
}

/// Writes reports to a `/dev/hidgN` node opened non-blocking
#[derive(Default)]
pub struct HidgSink {
    file: Mutex<Option<File>>,
}

impl HidgSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportSink for HidgSink {
    async fn open(&self, device: &Path, timeout: Duration) -> Result<(), HidError> {
        if self.file.lock().is_some() {
            return Ok(());
        }

        if !wait_for_device_nodes(&[device.to_path_buf()], timeout).await {
            return Err(HidError::DeviceUnavailable(format!(
                "{} did not appear within {:?}",
                device.display(),
                timeout
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|e| {
                HidError::DeviceUnavailable(format!("open {}: {}", device.display(), e))
            })?;
        debug!("Opened HID device {}", device.display());
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn write_report(&self, report: &KeyboardReport) -> std::io::Result<()> {
        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "HID device not open",
            ));
        };

        match file.write_all(report) {
            Ok(()) => {
                trace!("Sent keyboard report: {:02X?}", report);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(e),
            Err(e) => {
                // ESHUTDOWN and friends: drop the handle so the next run reopens
                *guard = None;
                Err(e)
            }
        }
    }

    fn close(&self) {
        self.file.lock().take();
    }
}

/// Payload library plus the single execution slot
pub struct KeystrokeService {
    controller: Arc<GadgetController>,
    sink: Arc<dyn ReportSink>,
    events: Arc<EventBus>,
    config: HidConfig,
    library: RwLock<Arc<PayloadLibrary>>,
    run_lock: tokio::sync::Mutex<()>,
    current: RwLock<Option<PayloadExecution>>,
    throttler: LogThrottler,
}

impl KeystrokeService {
    pub fn new(
        controller: Arc<GadgetController>,
        sink: Arc<dyn ReportSink>,
        events: Arc<EventBus>,
        config: HidConfig,
        library: PayloadLibrary,
    ) -> Self {
        Self {
            controller,
            sink,
            events,
            config,
            library: RwLock::new(Arc::new(library)),
            run_lock: tokio::sync::Mutex::new(()),
            current: RwLock::new(None),
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn list_payloads(&self) -> Vec<PayloadSummary> {
        self.library.read().list()
    }

    /// Reload the payload directory
    pub async fn rescan(&self) -> Vec<PayloadSummary> {
        let dir = self.library.read().dir().to_path_buf();
        let library = match tokio::task::spawn_blocking(move || PayloadLibrary::load(&dir)).await
        {
            Ok(library) => library,
            Err(e) => {
                warn!("Payload rescan task failed: {}", e);
                return self.list_payloads();
            }
        };
        let list = library.list();
        *self.library.write() = Arc::new(library);
        list
    }

    pub fn current_execution(&self) -> Option<PayloadExecution> {
        self.current.read().clone()
    }

    pub async fn execute_payload(&self, name: &str) -> Result<PayloadExecution, HidError> {
        let library = self.library.read().clone();
        let payload = library
            .get(name)
            .ok_or_else(|| HidError::PayloadNotFound(name.to_string()))?;
        let tokens = payload.tokens.clone()?;
        self.hid_generation()?;

        self.run(name, compile(&tokens)).await
    }

    /// Type literal text; `\n` is Enter
    pub async fn send_string(
        &self,
        text: &str,
        delay_ms: u64,
    ) -> Result<PayloadExecution, HidError> {
        let events = compile_text(text, delay_ms)?;
        self.hid_generation()?;

        self.run("send_string", events).await
    }

    /// Current generation if the bound function set includes the keyboard
    fn hid_generation(&self) -> Result<u64, HidError> {
        let snapshot = self.controller.snapshot();
        if !snapshot.mode.functions().contains(UsbFunction::Hid) {
            return Err(HidError::DeviceUnavailable(format!(
                "gadget mode {} has no HID function",
                snapshot.mode
            )));
        }
        Ok(snapshot.generation)
    }

    fn device_path(&self) -> PathBuf {
        self.controller
            .binder()
            .bound_functions()
            .hid_device
            .unwrap_or_else(|| PathBuf::from(&self.config.keyboard_device))
    }

    async fn run(&self, name: &str, events: Vec<KeyEvent>) -> Result<PayloadExecution, HidError> {
        let _guard = self.run_lock.lock().await;
        // The mode may have changed while queued
        let generation = self.hid_generation()?;

        self.sink
            .open(
                &self.device_path(),
                Duration::from_millis(self.config.device_wait_ms),
            )
            .await?;

        let execution = PayloadExecution {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            state: ExecutionState::Running,
            steps: 0,
            total_steps: events.len(),
            error: None,
        };
        *self.current.write() = Some(execution.clone());
        info!("Executing payload {} ({} events)", name, events.len());

        let result = self.play(&events, generation).await;
        if result.is_err() {
            // Never leave a key held down on the host
            let _ = self.sink.write_report(&RELEASE_REPORT);
        }
        self.sink.close();

        let mut finished = execution;
        finished.finished_at = Some(Utc::now());
        finished.steps = self.current.read().as_ref().map(|e| e.steps).unwrap_or(0);
        match &result {
            Ok(()) => {
                finished.state = ExecutionState::Completed;
                info!("Payload {} completed", name);
            }
            Err(e) => {
                finished.state = ExecutionState::Failed;
                finished.error = Some(e.to_string());
                warn!("Payload {} failed: {}", name, e);
            }
        }
        *self.current.write() = Some(finished.clone());

        self.events.publish(SystemEvent::PayloadFinished {
            execution_id: finished.id.clone(),
            name: finished.name.clone(),
            state: finished.state,
            error: finished.error.clone(),
        });

        result.map(|_| finished)
    }

    async fn play(&self, events: &[KeyEvent], generation: u64) -> Result<(), HidError> {
        let dwell = Duration::from_millis(self.config.key_dwell_ms);

        for (index, event) in events.iter().enumerate() {
            let snapshot = self.controller.snapshot();
            if snapshot.generation != generation
                || !snapshot.mode.functions().contains(UsbFunction::Hid)
            {
                return Err(HidError::DeviceUnavailable(
                    "gadget was rebound during execution".to_string(),
                ));
            }

            match report_for(event) {
                Some(report) => {
                    self.send(&report).await?;
                    if !dwell.is_zero() {
                        tokio::time::sleep(dwell).await;
                    }
                }
                None => {
                    if let KeyEvent::Delay(ms) = event {
                        tokio::time::sleep(Duration::from_millis(*ms)).await;
                    }
                }
            }

            if let Some(current) = self.current.write().as_mut() {
                current.steps = index + 1;
            }
        }
        Ok(())
    }

    async fn send(&self, report: &KeyboardReport) -> Result<(), HidError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.write_report(report) {
                Ok(()) => {
                    self.throttler.clear("hid_write");
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock && attempt < WRITE_ATTEMPTS => {
                    tokio::time::sleep(WRITE_RETRY_DELAY).await;
                }
                Err(e) => {
                    crate::warn_throttled!(self.throttler, "hid_write", "HID write error: {}", e);
                    return Err(HidError::WriteFailed(e.to_string()));
                }
            }
        }
    }
}
