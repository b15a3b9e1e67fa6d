//! Driver Monitoring System (DMS)
//!
//! Turns per-frame eye geometry into a debounced drowsiness alert state:
//! - Eye openness ratio (EAR) from six-point eye contours
//! - Time-based hysteresis over the openness signal
//! - Raised/Cleared alert events on entering and leaving the alert state
//!
//! Face and landmark detection is an external collaborator behind
//! [`Perception`].

pub mod config;
pub mod detector;
pub mod openness;
pub mod state;

pub use config::StateMachineConfig;
pub use detector::{FaceLandmarks, Perception};
pub use openness::{eye_openness, face_openness, EyeContour, Point};
pub use state::{AlertEvent, AlertKind, AlertState, DrowsinessStateMachine, OpennessSample};

use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Perception failed: {0}")]
    Perception(String),
}
