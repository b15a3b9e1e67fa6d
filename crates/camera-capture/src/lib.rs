//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the decoded frame type and the frame-source contract the
//! acquisition loop pulls from. Device enumeration and backend selection
//! live behind [`FrameSource`] implementations.

pub mod frame;
pub mod source;

pub use frame::VideoFrame;
pub use source::{FrameSource, ReplaySource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Camera not initialized")]
    NotInitialized,
}
