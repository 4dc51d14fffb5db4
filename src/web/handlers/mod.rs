use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::capture::{CaptureRecord, CaptureStatus};
use crate::config::{AppConfig, SyncSource};
use crate::error::{AppError, Result};
use crate::gadget::{GadgetMode, ModeSnapshot};
use crate::payload::{PayloadExecution, PayloadSummary};
use crate::state::{AppState, GadgetStatus};
use crate::store::StoreInfo;
use crate::sync::SyncReport;

/// Unified success envelope
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: &'static str,
    pub version: &'static str,
    pub hostname: String,
    pub mode: GadgetMode,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    Json(HealthResponse {
        success: true,
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        hostname,
        mode: state.controller.current_mode(),
    })
}

// ============================================================================
// Gadget
// ============================================================================

pub async fn gadget_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<GadgetStatus>> {
    ApiResponse::ok(state.gadget_status().await)
}

#[derive(Deserialize)]
pub struct SetModeRequest {
    pub mode: GadgetMode,
    #[serde(default)]
    pub read_only: bool,
}

pub async fn gadget_set_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetModeRequest>,
) -> Result<Json<ApiResponse<ModeSnapshot>>> {
    info!(
        "Mode switch requested: {} (read_only={})",
        req.mode, req.read_only
    );
    state.controller.switch_mode(req.mode, req.read_only).await?;
    Ok(ApiResponse::ok(state.controller.snapshot()))
}

// ============================================================================
// Capture
// ============================================================================

pub async fn capture_status(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<CaptureStatus>> {
    ApiResponse::ok(state.capture.status())
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    pub limit: Option<u32>,
}

const DEFAULT_SESSION_LIMIT: u32 = 50;
const MAX_SESSION_LIMIT: u32 = 1000;

pub async fn capture_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<ApiResponse<Vec<CaptureRecord>>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SESSION_LIMIT)
        .min(MAX_SESSION_LIMIT);
    Ok(ApiResponse::ok(state.history.list(limit).await?))
}

// ============================================================================
// Storage
// ============================================================================

pub async fn storage_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StoreInfo>> {
    ApiResponse::ok(state.store.info())
}

/// Either field falls back to the configured value
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SyncRequest {
    pub sources: Option<Vec<SyncSource>>,
    pub exclude: Option<Vec<String>>,
}

pub async fn storage_sync(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<ApiResponse<SyncReport>>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let config = state.config.get();
    let sources = req.sources.unwrap_or_else(|| config.sync.sources.clone());
    let exclude = req.exclude.unwrap_or_else(|| config.sync.exclude.clone());

    let report = state.sync.sync(&sources, &exclude).await?;
    Ok(Json(ApiResponse {
        success: report.succeeded,
        data: report,
    }))
}

// ============================================================================
// HID
// ============================================================================

pub async fn hid_payloads(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<PayloadSummary>>> {
    ApiResponse::ok(state.keystrokes.list_payloads())
}

pub async fn hid_rescan(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<PayloadSummary>>> {
    ApiResponse::ok(state.keystrokes.rescan().await)
}

pub async fn hid_execute(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<PayloadExecution>>> {
    Ok(ApiResponse::ok(state.keystrokes.execute_payload(&name).await?))
}

#[derive(Deserialize)]
pub struct TypeRequest {
    pub text: String,
    #[serde(default)]
    pub delay_ms: u64,
}

const MAX_TYPE_LEN: usize = 16 * 1024;

pub async fn hid_type(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TypeRequest>,
) -> Result<Json<ApiResponse<PayloadExecution>>> {
    if req.text.len() > MAX_TYPE_LEN {
        return Err(AppError::BadRequest(format!(
            "text longer than {} bytes",
            MAX_TYPE_LEN
        )));
    }
    Ok(ApiResponse::ok(
        state.keystrokes.send_string(&req.text, req.delay_ms).await?,
    ))
}

pub async fn hid_execution(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Option<PayloadExecution>>> {
    ApiResponse::ok(state.keystrokes.current_execution())
}

// ============================================================================
// Config
// ============================================================================

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ApiResponse<AppConfig>> {
    ApiResponse::ok((*state.config.get()).clone())
}
