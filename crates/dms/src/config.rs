//! DMS configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Drowsiness state machine configuration.
///
/// Range checks happen where settings enter the system; the state machine
/// takes whatever it is given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Openness below this counts as closed; exclusive range (0, 1)
    pub ear_threshold: f32,

    /// Continuous closed time before an alert is raised
    pub sustained_duration: Duration,
}

impl StateMachineConfig {
    pub const fn new(ear_threshold: f32, sustained_duration: Duration) -> Self {
        Self {
            ear_threshold,
            sustained_duration,
        }
    }
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self::new(0.25, Duration::from_secs(2))
    }
}
