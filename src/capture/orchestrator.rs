//! Connection-triggered capture
//!
//! Polls the gadget network link and keeps exactly one capture process
//! running per host connection. Link-down needs two consecutive down reads
//! before the session closes, so a flap shorter than one tick stays one
//! session.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collector::CollectionTrigger;
use super::host::HostProbe;
use super::link::{LinkProbe, LinkStatus};
use super::process::{CaptureLauncher, CaptureProcess};
use super::types::{CaptureError, CaptureRecord, CaptureState, CaptureStatus, EndReason};
use crate::config::CaptureConfig;
use crate::events::{EventBus, SystemEvent};
use crate::gadget::{GadgetController, UsbFunction};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Throttle window for repeated link probe failures
const PROBE_ERROR_THROTTLE_SECS: u64 = 30;

struct Session {
    record: CaptureRecord,
    process: Box<dyn CaptureProcess>,
    start_link: LinkStatus,
    last_link: LinkStatus,
}

#[derive(Default)]
struct TickState {
    session: Option<Session>,
    /// Debounced link state
    link_up: bool,
    /// One down read seen while `link_up`
    pending_down: bool,
    /// Generation the link tracking belongs to
    generation: u64,
    case_ids: CaseIds,
}

impl TickState {
    fn reset_link(&mut self) {
        self.link_up = false;
        self.pending_down = false;
    }
}

#[derive(Default)]
struct StatusView {
    link_up: bool,
    active: Option<CaptureRecord>,
    recent: VecDeque<CaptureRecord>,
}

/// `USB_%Y%m%d_%H%M%S`, suffixed `_N` when the second repeats
#[derive(Default)]
pub struct CaseIds {
    last_base: String,
    repeats: u32,
}

impl CaseIds {
    pub fn next(&mut self, now: DateTime<Local>) -> String {
        let base = format!("USB_{}", now.format("%Y%m%d_%H%M%S"));
        if base == self.last_base {
            self.repeats += 1;
            format!("{}_{}", base, self.repeats)
        } else {
            self.last_base = base.clone();
            self.repeats = 0;
            base
        }
    }
}

pub struct CaptureOrchestrator {
    controller: Arc<GadgetController>,
    probe: Arc<dyn LinkProbe>,
    host_probe: Arc<dyn HostProbe>,
    launcher: Arc<dyn CaptureLauncher>,
    collector: Arc<dyn CollectionTrigger>,
    events: Arc<EventBus>,
    config: CaptureConfig,
    default_interface: String,
    output_dir: PathBuf,
    state: Mutex<TickState>,
    status: parking_lot::RwLock<StatusView>,
    throttler: LogThrottler,
}

impl CaptureOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: Arc<GadgetController>,
        probe: Arc<dyn LinkProbe>,
        host_probe: Arc<dyn HostProbe>,
        launcher: Arc<dyn CaptureLauncher>,
        collector: Arc<dyn CollectionTrigger>,
        events: Arc<EventBus>,
        config: CaptureConfig,
        default_interface: String,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            controller,
            probe,
            host_probe,
            launcher,
            collector,
            events,
            config,
            default_interface,
            output_dir,
            state: Mutex::new(TickState::default()),
            status: parking_lot::RwLock::new(StatusView::default()),
            throttler: LogThrottler::with_secs(PROBE_ERROR_THROTTLE_SECS),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        let view = self.status.read();
        CaptureStatus {
            enabled: self.config.enabled,
            link_up: view.link_up,
            active: view.active.clone(),
            recent: view.recent.iter().cloned().collect(),
        }
    }

    /// Poll until cancelled, then close any open session
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(100));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Capture orchestrator started (poll every {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        self.shutdown().await;
        info!("Capture orchestrator stopped");
    }

    /// One observation of mode and link
    pub async fn tick(&self) {
        let snapshot = self.controller.snapshot();
        let mut state = self.state.lock().await;

        if !snapshot.functions().contains(UsbFunction::Network) {
            self.close(&mut state, EndReason::ModeExit).await;
            state.reset_link();
            self.status.write().link_up = false;
            return;
        }

        if state.generation != snapshot.generation {
            // Network function was rebuilt; whatever ran belongs to the old one
            self.close(&mut state, EndReason::ModeExit).await;
            state.reset_link();
            state.generation = snapshot.generation;
        }

        let interface = self
            .controller
            .binder()
            .bound_functions()
            .network_ifname
            .unwrap_or_else(|| self.default_interface.clone());

        let link = match self.probe.probe(&interface).await {
            Ok(link) => {
                self.throttler.clear("link_probe");
                link
            }
            Err(e) => {
                warn_throttled!(self.throttler, "link_probe", "Link probe failed: {}", e);
                LinkStatus::default()
            }
        };

        if link.up {
            state.pending_down = false;
            if !state.link_up {
                state.link_up = true;
                info!("Host connected on {}", interface);
                self.open(&mut state, &interface, link).await;
            } else if let Some(session) = state.session.as_mut() {
                session.last_link = link;
                if let Some(code) = session.process.try_exit() {
                    // No restart until the next link transition
                    self.fail(&mut state, CaptureError::UnexpectedExit(code), code);
                }
            }
        } else if state.link_up {
            if !state.pending_down {
                debug!("Link down on {}, confirming next tick", interface);
                state.pending_down = true;
            } else {
                info!("Host disconnected from {}", interface);
                state.reset_link();
                self.close(&mut state, EndReason::LinkDown).await;
            }
        }

        self.status.write().link_up = state.link_up;
    }

    async fn open(&self, state: &mut TickState, interface: &str, link: LinkStatus) {
        if !self.config.enabled {
            return;
        }

        let case_id = state.case_ids.next(Local::now());
        let output = self
            .output_dir
            .join("captures")
            .join(format!("{}.pcap", case_id));
        let mut record = CaptureRecord::new(case_id.clone(), output.to_string_lossy().into_owned());

        let started = self.launcher.start(interface, &output).await;
        let host = self.host_probe.snapshot(interface).await;
        for error in &host.errors {
            debug!("Host snapshot for {}: {}", case_id, error);
        }
        record.host = Some(host);

        match started {
            Ok(process) => {
                info!("Capture {} started -> {}", case_id, output.display());
                self.status.write().active = Some(record.clone());
                self.events.publish(SystemEvent::CaptureStarted {
                    case_id: case_id.clone(),
                    output_path: record.output_path.clone(),
                });
                state.session = Some(Session {
                    record,
                    process,
                    start_link: link,
                    last_link: link,
                });

                if self.config.auto_collect {
                    if let Err(e) = self.collector.trigger(&case_id, &self.output_dir) {
                        warn!("Auto-collection for {} not started: {}", case_id, e);
                    }
                }
            }
            Err(e) => {
                warn!("Capture {} failed to start: {}", case_id, e);
                let record = record
                    .finish(CaptureState::Failed, EndReason::StartFailed)
                    .with_error(&e);
                self.record_finished(record);
            }
        }
    }

    /// Graceful stop of the open session, if any
    async fn close(&self, state: &mut TickState, reason: EndReason) {
        let Some(mut session) = state.session.take() else {
            return;
        };

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        let exit_code = session.process.stop(grace).await;

        let mut record = session.record.finish(CaptureState::Stopped, reason);
        record.exit_code = exit_code;
        record.rx_bytes = session.last_link.rx_bytes.saturating_sub(session.start_link.rx_bytes);
        record.tx_bytes = session.last_link.tx_bytes.saturating_sub(session.start_link.tx_bytes);
        record.bytes_captured = tokio::fs::metadata(&record.output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        info!(
            "Capture {} stopped ({}, {} bytes)",
            record.case_id,
            reason.as_str(),
            record.bytes_captured
        );
        self.record_finished(record);
    }

    /// Session whose process already exited on its own
    fn fail(&self, state: &mut TickState, error: CaptureError, exit_code: Option<i32>) {
        let Some(session) = state.session.take() else {
            return;
        };
        warn!("Capture {} failed: {}", session.record.case_id, error);

        let mut record = session
            .record
            .finish(CaptureState::Failed, EndReason::UnexpectedExit)
            .with_error(&error);
        record.exit_code = exit_code;
        record.rx_bytes = session.last_link.rx_bytes.saturating_sub(session.start_link.rx_bytes);
        record.tx_bytes = session.last_link.tx_bytes.saturating_sub(session.start_link.tx_bytes);
        record.bytes_captured = std::fs::metadata(&record.output_path)
            .map(|m| m.len())
            .unwrap_or(0);
        self.record_finished(record);
    }

    fn record_finished(&self, record: CaptureRecord) {
        {
            let mut view = self.status.write();
            view.active = None;
            view.recent.push_front(record.clone());
            view.recent.truncate(self.config.history_size.max(1));
        }

        let event = match record.state {
            CaptureState::Failed => SystemEvent::CaptureFailed { record },
            _ => SystemEvent::CaptureStopped { record },
        };
        self.events.publish(event);
    }

    /// Close any open session with reason `shutdown`
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.close(&mut state, EndReason::Shutdown).await;
        state.reset_link();
        self.status.write().link_up = false;
    }
}
