use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma};
use std::sync::Arc;

/// 16-bit grayscale pixel storage
pub type FrameImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// One camera image with its sequence number and source tag
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number, monotonically increasing within an acquisition
    pub number: u64,
    /// Camera that produced the frame
    pub source: String,
    /// Timestamp when frame was captured
    pub timestamp: DateTime<Utc>,
    /// Pixel data (shared ownership for efficiency)
    pub image: Arc<FrameImage>,
}

impl Frame {
    /// Create a new frame
    pub fn new(number: u64, source: impl Into<String>, image: FrameImage) -> Self {
        Self {
            number,
            source: source.into(),
            timestamp: Utc::now(),
            image: Arc::new(image),
        }
    }

    /// Create a frame with no pixel content, used where only the arrival
    /// of the frame matters
    pub fn blank(number: u64, source: impl Into<String>) -> Self {
        Self::new(number, source, FrameImage::new(1, 1))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}
