//! Settings and reset routes

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use pipeline::DetectorSettings;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub version: u64,
    pub settings: DetectorSettings,
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    let shared = state.session.settings();
    Json(SettingsResponse {
        version: shared.version(),
        settings: (*shared.get()).clone(),
    })
}

/// Replace the detector settings; applied from the next frame
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<DetectorSettings>,
) -> ApiResult<Json<SettingsResponse>> {
    let version = state.session.settings().update(settings.clone())?;
    Ok(Json(SettingsResponse { version, settings }))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
}

/// Clear the alarm and telemetry before the next frame
pub async fn reset(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ResetResponse>) {
    state.session.request_reset();
    (
        StatusCode::ACCEPTED,
        Json(ResetResponse {
            status: "reset requested",
        }),
    )
}
