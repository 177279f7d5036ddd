use crate::bridge::HostBridge;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use crayon_core::{Settings, SettingsPatch};
use crayon_engine::{ApplyReport, ColorEngine};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ColorEngine>,
    pub bridge: Arc<HostBridge>,
}

#[derive(Debug, Deserialize)]
pub struct ColorizeRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ColorizeResponse {
    pub requested: usize,
    pub unique: usize,
    pub painted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl From<ApplyReport> for ColorizeResponse {
    fn from(report: ApplyReport) -> Self {
        Self {
            requested: report.requested,
            unique: report.unique,
            painted: report.painted,
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub host_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_client_id: Option<String>,
    pub poller_running: bool,
    pub cursor_ready: bool,
    pub pending: usize,
    pub auto_mode: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/settings/reset", post(reset_settings))
        .route("/api/colorize", post(colorize))
        .route("/api/status", get(status))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.engine.get_settings().await)
}

async fn put_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<Settings> {
    Json(state.engine.set_settings(patch).await)
}

async fn reset_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.engine.reset_settings().await)
}

async fn colorize(
    State(state): State<AppState>,
    Json(request): Json<ColorizeRequest>,
) -> Json<ColorizeResponse> {
    let report = state.engine.apply_classification(&request.ids).await;
    Json(report.into())
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let host_client_id = state.bridge.host_client_id().await;
    Json(StatusResponse {
        host_connected: host_client_id.is_some(),
        host_client_id,
        poller_running: state.engine.is_running(),
        cursor_ready: state.engine.cursor_ready(),
        pending: state.engine.pending_len(),
        auto_mode: state.engine.get_settings().await.auto_mode,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let AppState { engine, bridge } = state;
    ws.on_upgrade(move |socket| async move {
        bridge.handle_socket(socket, addr, engine).await;
    })
}
