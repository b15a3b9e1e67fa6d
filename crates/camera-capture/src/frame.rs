//! Video frame types

use image::RgbImage;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3), empty for metadata-only frames
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the source started)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Frame with no pixel payload.
    ///
    /// Used by sources whose perception already happened upstream and only
    /// the timing and sequence matter.
    pub fn metadata_only(timestamp_ns: u64, sequence: u32) -> Self {
        Self::new(Vec::new(), 0, 0, timestamp_ns, sequence)
    }

    /// Whether the payload is a complete RGB24 raster
    pub fn has_pixels(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }

    /// Borrow the payload as an `image` buffer for drawing.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.has_pixels() {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Replace the payload with a drawn image of the same dimensions.
    pub fn set_rgb_image(&mut self, image: RgbImage) {
        self.width = image.width();
        self.height = image.height();
        self.data = image.into_raw();
    }
}
