//! Processed frame output

use std::sync::Arc;
use std::time::Duration;

use camera_capture::VideoFrame;
use dms::{AlertEvent, AlertState, OpennessSample};
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tokio::sync::watch;

/// Border colour drawn while alerting
const ALERT_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

/// Border width as a fraction of the shorter frame side
const BORDER_FRACTION: u32 = 40;

/// A frame together with what the pipeline derived from it
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: VideoFrame,
    /// Sample fed to the state machine (clamped, monotonic timestamp)
    pub sample: OpennessSample,
    /// Openness before clamping to [0, 1]
    pub raw_openness: f32,
    pub state: AlertState,
    /// Time the eyes have been continuously closed, zero when open
    pub closed_for: Duration,
    pub event: Option<AlertEvent>,
}

/// Receives every processed frame on the acquisition thread.
///
/// Implementations must not block; slow consumers should drop frames.
pub trait FramePublisher: Send {
    fn publish(&mut self, frame: AnnotatedFrame);
}

/// Discards frames
#[derive(Debug, Default)]
pub struct NullPublisher;

impl FramePublisher for NullPublisher {
    fn publish(&mut self, _frame: AnnotatedFrame) {}
}

/// Keeps only the most recent frame for any number of watchers
pub struct WatchPublisher {
    tx: watch::Sender<Option<Arc<AnnotatedFrame>>>,
}

impl WatchPublisher {
    pub fn channel() -> (Self, watch::Receiver<Option<Arc<AnnotatedFrame>>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl FramePublisher for WatchPublisher {
    fn publish(&mut self, frame: AnnotatedFrame) {
        // Succeeds even with no receivers left
        self.tx.send_replace(Some(Arc::new(frame)));
    }
}

/// Draw the alert border onto a frame with pixels. Returns false for
/// metadata-only frames, which are left untouched.
pub fn draw_alert_border(frame: &mut VideoFrame) -> bool {
    let Some(mut image) = frame.to_rgb_image() else {
        return false;
    };

    let (width, height) = image.dimensions();
    let thickness = (width.min(height) / BORDER_FRACTION).max(1);
    for inset in 0..thickness {
        let w = width.saturating_sub(2 * inset);
        let h = height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(inset as i32, inset as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut image, rect, ALERT_COLOUR);
    }

    frame.set_rgb_image(image);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn grey_frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame::new(vec![128; (width * height * 3) as usize], width, height, 0, 0)
    }

    fn pixel(frame: &VideoFrame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width + x) * 3) as usize;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    #[test]
    fn test_border_drawn_on_edges_only() {
        let mut frame = grey_frame(80, 80);
        assert!(draw_alert_border(&mut frame));

        // 80 / 40 = 2 pixel border
        assert_eq!(pixel(&frame, 0, 0), [255, 0, 0]);
        assert_eq!(pixel(&frame, 1, 40), [255, 0, 0]);
        assert_eq!(pixel(&frame, 79, 79), [255, 0, 0]);
        assert_eq!(pixel(&frame, 2, 40), [128, 128, 128]);
        assert_eq!(pixel(&frame, 40, 40), [128, 128, 128]);
    }

    #[test]
    fn test_metadata_frame_untouched() {
        let mut frame = VideoFrame::metadata_only(5, 1);
        assert!(!draw_alert_border(&mut frame));
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_watch_keeps_latest() {
        let (mut publisher, rx) = WatchPublisher::channel();
        let now = Instant::now();
        for seq in 0..3 {
            publisher.publish(AnnotatedFrame {
                frame: VideoFrame::metadata_only(0, seq),
                sample: OpennessSample::new(0.3, now, true),
                raw_openness: 0.3,
                state: AlertState::Open,
                closed_for: Duration::ZERO,
                event: None,
            });
        }
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.frame.sequence, 2);
    }
}
