//! Telemetry Store
//!
//! Bounded openness and alert-event histories for one detector session.
//! The acquisition loop appends; any number of readers take immutable
//! snapshots concurrently.

mod export;
mod store;

pub use export::{AlertRecord, SampleRecord, TelemetryExport};
pub use store::{FrameRecord, TelemetryConfig, TelemetrySnapshot, TelemetryStore};

use thiserror::Error;

/// Telemetry errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid capacity: {0}")]
    Capacity(#[from] ring_buffer::RingBufferError),
}
