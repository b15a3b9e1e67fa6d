//! Eye openness ratio (EAR)

use serde::{Deserialize, Serialize};

/// 2D image point
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Six points around one eye.
///
/// Index 0 and 3 are the horizontal corners; (1, 5) and (2, 4) are the
/// vertical pairs.
pub type EyeContour = [Point; 6];

/// Openness ratio of a single eye.
///
/// Returns 0 for a degenerate contour whose corners coincide. The result is
/// deliberately not clamped: values above 1 indicate bad upstream geometry.
pub fn eye_openness(eye: &EyeContour) -> f32 {
    let horizontal = eye[0].distance(eye[3]);
    if horizontal == 0.0 || !horizontal.is_finite() {
        return 0.0;
    }

    let vertical = eye[1].distance(eye[5]) + eye[2].distance(eye[4]);
    let ear = vertical / (2.0 * horizontal);
    if ear.is_finite() {
        ear
    } else {
        0.0
    }
}

/// Mean openness over all eyes of a face; 0 when no eyes were found.
pub fn face_openness(eyes: &[EyeContour]) -> f32 {
    if eyes.is_empty() {
        return 0.0;
    }
    eyes.iter().map(eye_openness).sum::<f32>() / eyes.len() as f32
}
