//! Frame source contract

use std::collections::VecDeque;

use tracing::debug;

use crate::{CameraError, VideoFrame};

/// A blocking producer of frames.
///
/// `Ok(None)` means the stream ended; an `Err` is a device failure. Either
/// one ends the acquisition loop.
pub trait FrameSource: Send {
    /// Block until the next frame is available
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;

    /// Release the underlying device. Called once when the loop exits.
    fn close(&mut self) {}
}

/// Replays a fixed list of frames, optionally failing after the last one.
pub struct ReplaySource {
    frames: VecDeque<VideoFrame>,
    fail_at_end: Option<String>,
    closed: bool,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = VideoFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            fail_at_end: None,
            closed: false,
        }
    }

    /// Report a streaming error instead of end-of-stream once exhausted
    pub fn failing_at_end(mut self, reason: impl Into<String>) -> Self {
        self.fail_at_end = Some(reason.into());
        self
    }

    /// Frames not yet handed out
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if self.closed {
            return Err(CameraError::NotInitialized);
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => match self.fail_at_end.take() {
                Some(reason) => Err(CameraError::Stream(reason)),
                None => Ok(None),
            },
        }
    }

    fn close(&mut self) {
        debug!("Replay source closed with {} frames unread", self.frames.len());
        self.closed = true;
    }
}
