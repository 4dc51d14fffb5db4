//! Persisted capture session history

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{CaptureRecord, CaptureState, EndReason};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};

/// Reads and writes the `capture_sessions` table
#[derive(Clone)]
pub struct CaptureHistory {
    pool: Pool<Sqlite>,
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn from_row(row: &SqliteRow) -> std::result::Result<CaptureRecord, sqlx::Error> {
    let state: String = row.try_get("state")?;
    let started_at: String = row.try_get("started_at")?;
    let finished_at: Option<String> = row.try_get("finished_at")?;
    let end_reason: Option<String> = row.try_get("end_reason")?;
    let host: Option<String> = row.try_get("host")?;

    Ok(CaptureRecord {
        case_id: row.try_get("case_id")?,
        output_path: row.try_get("output_path")?,
        state: parse_enum(&state).unwrap_or(CaptureState::Failed),
        connected_at: parse_time(&started_at).unwrap_or_default(),
        disconnected_at: finished_at.as_deref().and_then(parse_time),
        bytes_captured: row.try_get::<Option<i64>, _>("bytes_captured")?.unwrap_or(0) as u64,
        rx_bytes: row.try_get::<Option<i64>, _>("rx_bytes")?.unwrap_or(0) as u64,
        tx_bytes: row.try_get::<Option<i64>, _>("tx_bytes")?.unwrap_or(0) as u64,
        exit_code: row.try_get("exit_code")?,
        end_reason: end_reason.as_deref().and_then(parse_enum::<EndReason>),
        error: row.try_get("error")?,
        host: host.as_deref().and_then(|h| serde_json::from_str(h).ok()),
    })
}

impl CaptureHistory {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert or replace the record for its case id
    pub async fn save(&self, record: &CaptureRecord) -> Result<()> {
        let host = record.host.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO capture_sessions
                (case_id, state, output_path, started_at, finished_at,
                 bytes_captured, rx_bytes, tx_bytes, exit_code, end_reason, error, host)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&record.case_id)
        .bind(record.state.as_str())
        .bind(&record.output_path)
        .bind(record.connected_at.to_rfc3339())
        .bind(record.disconnected_at.map(|t| t.to_rfc3339()))
        .bind(record.bytes_captured as i64)
        .bind(record.rx_bytes as i64)
        .bind(record.tx_bytes as i64)
        .bind(record.exit_code)
        .bind(record.end_reason.map(|r| r.as_str()))
        .bind(&record.error)
        .bind(host)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first
    pub async fn list(&self, limit: u32) -> Result<Vec<CaptureRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM capture_sessions ORDER BY started_at DESC, case_id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(from_row).collect::<std::result::Result<_, _>>()?)
    }
}

/// Persist every finalized session until cancelled
///
/// Events already queued when the token fires are still written.
pub async fn run_history_recorder(
    history: Arc<CaptureHistory>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) {
    let mut rx = events.subscribe();
    loop {
        let event = tokio::select! {
            biased;
            event = rx.recv() => event,
            _ = cancel.cancelled() => break,
        };

        match event {
            Ok(SystemEvent::CaptureStopped { record } | SystemEvent::CaptureFailed { record }) => {
                if let Err(e) = history.save(&record).await {
                    warn!("Failed to persist capture {}: {}", record.case_id, e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("Capture history recorder missed {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Capture history recorder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, HostSnapshot, NeighborEntry};
    use crate::config::ConfigStore;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_list() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let history = CaptureHistory::new(store.pool().clone());

        let mut first = CaptureRecord::new("USB_20260101_100000".into(), "/o/a.pcap".into())
            .finish(CaptureState::Stopped, EndReason::LinkDown);
        first.rx_bytes = 4096;
        first.exit_code = Some(0);
        first.host = Some(HostSnapshot {
            neighbors: vec![NeighborEntry {
                ip: "192.168.7.1".into(),
                mac: Some("02:00:00:00:00:02".into()),
                state: None,
            }],
            connections: vec!["tcp ESTAB 0 0 192.168.7.2:22 192.168.7.1:50412".into()],
            ..Default::default()
        });
        history.save(&first).await.unwrap();

        let second = CaptureRecord::new("USB_20260101_110000".into(), "/o/b.pcap".into())
            .finish(CaptureState::Failed, EndReason::StartFailed)
            .with_error(&CaptureError::SubprocessStartFailed("permission denied".into()));
        history.save(&second).await.unwrap();

        let records = history.list(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].case_id, "USB_20260101_110000");
        assert_eq!(records[0].state, CaptureState::Failed);
        assert_eq!(records[0].end_reason, Some(EndReason::StartFailed));
        assert!(records[0].error.as_deref().unwrap().contains("permission denied"));
        assert_eq!(records[1].rx_bytes, 4096);
        assert_eq!(records[1].host, first.host);
        assert!(records[0].host.is_none());
        assert_eq!(records[1].exit_code, Some(0));

        assert_eq!(history.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recorder_persists_events() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let history = Arc::new(CaptureHistory::new(store.pool().clone()));
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_history_recorder(
            history.clone(),
            events.clone(),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        let record = CaptureRecord::new("USB_20260101_120000".into(), "/o/c.pcap".into())
            .finish(CaptureState::Stopped, EndReason::Shutdown);
        events.publish(SystemEvent::CaptureStopped { record });

        let mut saved = Vec::new();
        for _ in 0..50 {
            saved = history.list(10).await.unwrap();
            if !saved.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].end_reason, Some(EndReason::Shutdown));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_recorder_drains_before_stopping() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        let history = Arc::new(CaptureHistory::new(store.pool().clone()));
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_history_recorder(
            history.clone(),
            events.clone(),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        // Final record and cancellation arrive together at shutdown
        for n in 0..3 {
            let record =
                CaptureRecord::new(format!("USB_20260101_12000{}", n), "/o/c.pcap".into())
                    .finish(CaptureState::Stopped, EndReason::Shutdown);
            events.publish(SystemEvent::CaptureStopped { record });
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(history.list(10).await.unwrap().len(), 3);
    }
}
