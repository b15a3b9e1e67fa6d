//! Runtime detector settings

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use alerting::DispatcherConfig;
use dms::StateMachineConfig;
use serde::{Deserialize, Serialize};
use telemetry::TelemetryConfig;
use tracing::info;

use crate::ConfigError;

/// Everything that can be tuned while a session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Openness below this counts as closed
    pub ear_threshold: f32,
    /// Closed time before an alert is raised (seconds)
    pub sustained_secs: f64,
    /// Minimum time between alert plays (seconds)
    pub rearm_secs: f64,
    /// Openness samples kept in telemetry
    pub sample_capacity: usize,
    /// Alert events kept in telemetry
    pub event_capacity: usize,
    /// Draw the alert overlay on published frames
    pub annotate_frames: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            sustained_secs: 2.0,
            rearm_secs: 2.0,
            sample_capacity: 100,
            event_capacity: 50,
            annotate_frames: true,
        }
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if value < 0.0 {
        return Err(ConfigError::Duration { field, value });
    }
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Duration { field, value })
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.ear_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold >= 1.0 {
            return Err(ConfigError::Threshold(threshold));
        }
        seconds("sustained_secs", self.sustained_secs)?;
        seconds("rearm_secs", self.rearm_secs)?;
        if self.sample_capacity == 0 {
            return Err(ConfigError::Capacity("sample_capacity"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Capacity("event_capacity"));
        }
        Ok(())
    }

    pub fn state_machine(&self) -> StateMachineConfig {
        StateMachineConfig::new(
            self.ear_threshold,
            seconds("sustained_secs", self.sustained_secs).unwrap_or_default(),
        )
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            rearm_interval: seconds("rearm_secs", self.rearm_secs).unwrap_or_default(),
        }
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            sample_capacity: self.sample_capacity,
            event_capacity: self.event_capacity,
        }
    }
}

/// Settings shared between the acquisition loop and configuration callers.
///
/// Updates swap the whole value at once and bump a version the loop
/// compares against once per frame.
#[derive(Debug)]
pub struct SharedSettings {
    current: RwLock<Arc<DetectorSettings>>,
    version: AtomicU64,
}

impl SharedSettings {
    pub fn new(settings: DetectorSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            version: AtomicU64::new(0),
        })
    }

    pub fn get(&self) -> Arc<DetectorSettings> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Validate and install new settings, returning the new version
    pub fn update(&self, settings: DetectorSettings) -> Result<u64, ConfigError> {
        settings.validate()?;
        info!(
            "Detector settings updated: threshold={:.3}, sustained={}s, rearm={}s",
            settings.ear_threshold, settings.sustained_secs, settings.rearm_secs
        );
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(settings);
        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = DetectorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.state_machine().sustained_duration, Duration::from_secs(2));
        assert_eq!(settings.dispatcher().rearm_interval, Duration::from_secs(2));
        assert_eq!(settings.telemetry(), TelemetryConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            DetectorSettings {
                ear_threshold: 1.2,
                ..Default::default()
            },
            DetectorSettings {
                sustained_secs: -1.0,
                ..Default::default()
            },
            DetectorSettings {
                rearm_secs: f64::NAN,
                ..Default::default()
            },
            DetectorSettings {
                event_capacity: 0,
                ..Default::default()
            },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
    }

    #[test]
    fn test_rejected_update_keeps_previous() {
        let shared = SharedSettings::new(DetectorSettings::default()).unwrap();

        let err = shared
            .update(DetectorSettings {
                ear_threshold: 0.0,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::Threshold(0.0));
        assert_eq!(shared.version(), 0);
        assert_eq!(shared.get().ear_threshold, 0.25);

        let version = shared
            .update(DetectorSettings {
                ear_threshold: 0.2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(shared.get().ear_threshold, 0.2);
    }

    #[test]
    fn test_partial_settings_deserialize_with_defaults() {
        let settings: DetectorSettings =
            serde_json::from_str(r#"{"sustained_secs": 3.5}"#).unwrap();
        assert_eq!(settings.sustained_secs, 3.5);
        assert_eq!(settings.ear_threshold, 0.25);
    }
}
