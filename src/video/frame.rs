//! Video frames and the latest-frame slot

use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::RwLock;
use std::sync::Arc;

/// An owned camera frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    /// Submission order, starting at 0
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Most recently submitted frame, shared between the submitter and readers
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<RwLock<Option<Arc<VideoFrame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, frame: Arc<VideoFrame>) {
        *self.inner.write() = Some(frame);
    }

    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.set(Arc::new(VideoFrame::new(RgbImage::new(4, 4), 0)));
        slot.set(Arc::new(VideoFrame::new(RgbImage::new(8, 6), 1)));

        let latest = slot.latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!((latest.width(), latest.height()), (8, 6));
    }
}
