//! Frame Pipeline
//!
//! Orchestrates one drowsiness-detection session:
//! - Acquisition loop on a dedicated blocking worker
//! - Perception, openness, state machine, alert dispatch, telemetry per frame
//! - Runtime settings picked up between frames
//! - Cooperative stop and explicit session teardown

pub mod landmark_feed;
mod pipeline;
mod publisher;
mod session;
mod settings;

pub use pipeline::{FramePipeline, FrameReport, PipelineExit};
pub use publisher::{
    draw_alert_border, AnnotatedFrame, FramePublisher, NullPublisher, WatchPublisher,
};
pub use session::{DetectorSession, SessionParts, Signal};
pub use settings::{DetectorSettings, SharedSettings};

use camera_capture::CameraError;
use thiserror::Error;

/// Rejected configuration; the previous settings stay in effect
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("ear_threshold {0} must be within (0, 1)")]
    Threshold(f32),

    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    Duration { field: &'static str, value: f64 },

    #[error("{0} must be at least 1")]
    Capacity(&'static str),
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Frame acquisition failed: {0}")]
    Acquisition(#[from] CameraError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Detector setup failed: {0}")]
    Setup(String),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(#[from] telemetry::TelemetryError),

    #[error("Pipeline worker failed: {0}")]
    Worker(String),

    #[error("Session is not running")]
    NotRunning,
}
