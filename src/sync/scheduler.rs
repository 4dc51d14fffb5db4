//! Periodic and capture-triggered sync runs

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::synchronizer::Synchronizer;
use crate::config::SyncConfig;
use crate::events::{EventBus, SystemEvent};
use crate::store::StoreError;

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_once(sync: &Synchronizer, reason: &str) {
    debug!("Scheduled sync ({})", reason);
    match sync.sync_default().await {
        Ok(_) => {}
        // Host has the store or a manual sync is running; try next time
        Err(StoreError::StoreBusy(msg)) => info!("Skipping {} sync: {}", reason, msg),
        Err(e) => warn!("{} sync failed: {}", reason, e),
    }
}

/// Runs until `cancel` fires; returns immediately when no trigger is enabled
pub async fn run_sync_scheduler(
    sync: Arc<Synchronizer>,
    events: Arc<EventBus>,
    config: SyncConfig,
    cancel: CancellationToken,
) {
    if config.interval_secs.is_none() && !config.after_capture {
        debug!("No automatic sync trigger configured");
        return;
    }

    let mut interval = config.interval_secs.filter(|s| *s > 0).map(|secs| {
        let period = Duration::from_secs(secs);
        let mut i = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });
    let mut rx = events.subscribe();
    info!(
        "Sync scheduler started (interval={:?}s, after_capture={})",
        config.interval_secs, config.after_capture
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = next_tick(&mut interval) => run_once(&sync, "periodic").await,
            event = rx.recv() => match event {
                Ok(SystemEvent::CaptureStopped { .. } | SystemEvent::CaptureFailed { .. })
                    if config.after_capture =>
                {
                    run_once(&sync, "post-capture").await
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("Sync scheduler lagged {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureRecord, CaptureState, EndReason};
    use crate::testing::test_store;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_after_capture_trigger() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(EventBus::new());
        let (store, mounter) = test_store(&dir, events.clone());
        let sync = Arc::new(Synchronizer::new(
            store,
            events.clone(),
            dir.path().join("output"),
            SyncConfig::default(),
        ));
        let config = SyncConfig {
            after_capture: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut rx = events.subscribe();
        let task = tokio::spawn(run_sync_scheduler(
            sync,
            events.clone(),
            config,
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        let record = CaptureRecord::new("USB_20260101_000000".into(), "/tmp/x.pcap".into())
            .finish(CaptureState::Stopped, EndReason::LinkDown);
        events.publish(SystemEvent::CaptureStopped { record });

        let completed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(SystemEvent::SyncCompleted { succeeded, .. }) = rx.recv().await {
                    return succeeded;
                }
            }
        })
        .await
        .unwrap();
        assert!(completed);
        assert_eq!(mounter.sync_count(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_trigger_returns() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(EventBus::new());
        let (store, _) = test_store(&dir, events.clone());
        let sync = Arc::new(Synchronizer::new(
            store,
            events.clone(),
            dir.path().to_path_buf(),
            SyncConfig::default(),
        ));
        run_sync_scheduler(sync, events, SyncConfig::default(), CancellationToken::new()).await;
    }
}
