//! Serializable telemetry views

use std::time::Instant;

use chrono::{DateTime, Utc};
use dms::{AlertEvent, AlertKind, AlertState, OpennessSample};
use serde::Serialize;

use crate::store::TelemetrySnapshot;

/// One openness sample, timed relative to the session start
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub offset_ms: u64,
    pub value: f32,
    pub face_present: bool,
}

/// One alert event with its wall-clock time
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub offset_ms: u64,
    pub at: DateTime<Utc>,
    pub kind: AlertKind,
    pub openness_at_trigger: f32,
}

/// JSON-friendly form of a [`TelemetrySnapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryExport {
    pub started_at: DateTime<Utc>,
    pub state: AlertState,
    pub closed_for_ms: u64,
    pub frames_recorded: u64,
    pub alerts_raised: u64,
    pub latest_openness: Option<f32>,
    /// Rolling mean over the retained samples with a face
    pub average_openness: Option<f32>,
    /// Countdown to the next alert while eyes are closing
    pub alert_in_ms: Option<u64>,
    pub face_present: bool,
    pub openness_history: Vec<SampleRecord>,
    pub alert_history: Vec<AlertRecord>,
}

fn offset_ms(epoch: Instant, at: Instant) -> u64 {
    at.saturating_duration_since(epoch).as_millis() as u64
}

impl TelemetrySnapshot {
    fn wall_clock(&self, at: Instant) -> DateTime<Utc> {
        let offset = at.saturating_duration_since(self.epoch);
        chrono::Duration::from_std(offset)
            .map(|delta| self.started_at + delta)
            .unwrap_or(self.started_at)
    }

    pub fn sample_record(&self, sample: &OpennessSample) -> SampleRecord {
        SampleRecord {
            offset_ms: offset_ms(self.epoch, sample.timestamp),
            value: sample.value,
            face_present: sample.face_present,
        }
    }

    pub fn alert_record(&self, event: &AlertEvent) -> AlertRecord {
        AlertRecord {
            offset_ms: offset_ms(self.epoch, event.timestamp),
            at: self.wall_clock(event.timestamp),
            kind: event.kind,
            openness_at_trigger: event.openness_at_trigger,
        }
    }

    pub fn export(&self) -> TelemetryExport {
        let latest = self.latest_sample();
        TelemetryExport {
            started_at: self.started_at,
            state: self.current_state,
            closed_for_ms: self.closed_for().as_millis() as u64,
            frames_recorded: self.frames_recorded,
            alerts_raised: self.alerts_raised,
            latest_openness: latest.map(|s| s.value),
            average_openness: self.average_openness(),
            alert_in_ms: self.alert_in.map(|d| d.as_millis() as u64),
            face_present: latest.is_some_and(|s| s.face_present),
            openness_history: self
                .openness_history
                .iter()
                .map(|s| self.sample_record(s))
                .collect(),
            alert_history: self
                .alert_history
                .iter()
                .map(|e| self.alert_record(e))
                .collect(),
        }
    }
}
