//! Alert Routes

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use telemetry::AlertRecord;

use crate::AppState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    /// Newest first
    pub data: Vec<AlertRecord>,
    pub count: usize,
    /// Raised alerts this session, including ones evicted from the history
    pub total_raised: u64,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let snapshot = state.session.snapshot();
    let data: Vec<_> = snapshot
        .alert_history
        .iter()
        .rev()
        .take(params.limit)
        .map(|event| snapshot.alert_record(event))
        .collect();

    Json(AlertResponse {
        count: data.len(),
        total_raised: snapshot.alerts_raised,
        data,
    })
}
