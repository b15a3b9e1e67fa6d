//! Status Routes

use std::sync::Arc;

use alerting::DispatchStatsSnapshot;
use axum::{extract::State, Json};
use dms::AlertState;
use serde::Serialize;
use telemetry::TelemetryExport;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub session_id: Uuid,
    pub pipeline_running: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let running = !state.session.is_finished();
    Json(HealthResponse {
        status: if running { "healthy" } else { "stopped" },
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session_id: state.session.id(),
        pipeline_running: running,
    })
}

/// Live detector status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: AlertState,
    pub openness: Option<f32>,
    /// Rolling mean of the retained openness history
    pub average_openness: Option<f32>,
    pub face_present: bool,
    pub closed_for_secs: f32,
    /// Seconds until an alert fires if the eyes stay closed
    pub alert_in_secs: Option<f32>,
    pub frames_recorded: u64,
    pub alerts_raised: u64,
    pub dispatch: DispatchStatsSnapshot,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.session.snapshot();
    let latest = snapshot.latest_sample();

    Json(StatusResponse {
        state: snapshot.current_state,
        openness: latest.map(|s| s.value),
        average_openness: snapshot.average_openness(),
        face_present: latest.is_some_and(|s| s.face_present),
        closed_for_secs: snapshot.closed_for().as_secs_f32(),
        alert_in_secs: snapshot.alert_in.map(|d| d.as_secs_f32()),
        frames_recorded: snapshot.frames_recorded,
        alerts_raised: snapshot.alerts_raised,
        dispatch: state.session.dispatch_stats().snapshot(),
    })
}

pub async fn telemetry(State(state): State<Arc<AppState>>) -> Json<TelemetryExport> {
    Json(state.session.snapshot().export())
}

/// Most recent processed frame
#[derive(Debug, Serialize)]
pub struct FrameResponse {
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub raw_openness: f32,
    pub openness: f32,
    pub face_present: bool,
    pub state: AlertState,
    pub closed_for_ms: u64,
}

pub async fn latest_frame(State(state): State<Arc<AppState>>) -> ApiResult<Json<FrameResponse>> {
    let latest = state.frames.as_ref().and_then(|rx| rx.borrow().clone());
    let Some(frame) = latest else {
        return Err(ApiError::not_found("no frame processed yet"));
    };

    Ok(Json(FrameResponse {
        sequence: frame.frame.sequence,
        timestamp_ns: frame.frame.timestamp_ns,
        width: frame.frame.width,
        height: frame.frame.height,
        raw_openness: frame.raw_openness,
        openness: frame.sample.value,
        face_present: frame.sample.face_present,
        state: frame.state,
        closed_for_ms: frame.closed_for.as_millis() as u64,
    }))
}
