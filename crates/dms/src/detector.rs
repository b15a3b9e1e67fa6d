//! Perception contract: frame in, eye geometry out

use camera_capture::frame::VideoFrame;
use serde::{Deserialize, Serialize};

use crate::openness::{face_openness, EyeContour};
use crate::DmsError;

/// Eye geometry for one detected face
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    /// Zero, one or two eye contours. An empty list means the face was
    /// found but its eyes were not, which reads as closed.
    pub eyes: Vec<EyeContour>,
}

impl FaceLandmarks {
    pub fn new(eyes: Vec<EyeContour>) -> Self {
        Self { eyes }
    }

    /// Raw (unclamped) openness ratio of this face
    pub fn openness(&self) -> f32 {
        face_openness(&self.eyes)
    }
}

/// Face and eye landmark detector.
///
/// Runs synchronously on the acquisition thread and is expected to have
/// bounded latency. Returns every face found; callers use the first one.
pub trait Perception: Send {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceLandmarks>, DmsError>;
}

impl<F> Perception for F
where
    F: FnMut(&VideoFrame) -> Result<Vec<FaceLandmarks>, DmsError> + Send,
{
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceLandmarks>, DmsError> {
        self(frame)
    }
}
