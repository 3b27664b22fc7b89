//! Frame sampling and JPEG encoding for the send-video loop

use bytes::Bytes;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{EncoderStats, JpegEncoder};
use crate::config::VideoConfig;
use crate::error::CodecError;
use crate::queue::{MediaQueue, QueueStats};
use crate::video::frame::{FrameSlot, VideoFrame};

/// Latest-frame slot plus the droppable send queue
pub struct VideoPipeline {
    queue: MediaQueue<Arc<VideoFrame>>,
    latest: FrameSlot,
    encoder: Arc<JpegEncoder>,
    interval: Duration,
    /// Frames are queued for sending only while active
    active: AtomicBool,
    next_sequence: AtomicU64,
}

impl VideoPipeline {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            queue: MediaQueue::new(config.queue_capacity, config.overflow),
            latest: FrameSlot::new(),
            encoder: Arc::new(JpegEncoder::new(config.jpeg_quality)),
            interval: config.interval(),
            active: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Submit a camera frame. Never blocks.
    ///
    /// The image is copied; the caller may reuse its buffer immediately.
    /// Returns `true` if the frame was queued for sending.
    pub fn submit_frame(&self, image: &RgbImage) -> bool {
        self.submit_owned(image.clone())
    }

    /// Submit a frame the caller no longer needs
    pub fn submit_owned(&self, image: RgbImage) -> bool {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(VideoFrame::new(image, sequence));
        self.latest.set(frame.clone());

        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let queued = self.queue.push(frame);
        if !queued {
            tracing::trace!("Video frame {} dropped", sequence);
        }
        queued
    }

    /// Begin queueing submitted frames for sending
    pub fn activate(&self) {
        self.queue.clear();
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop queueing and discard frames not yet sent
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        let discarded = self.queue.clear();
        if discarded > 0 {
            tracing::debug!("Discarded {} unsent video frames", discarded);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for a queued frame and JPEG-encode it on the
    /// blocking pool
    pub async fn next_encoded(&self, timeout: Duration) -> Option<Result<Bytes, CodecError>> {
        let frame = self.queue.pop_async(timeout).await?;
        let encoder = self.encoder.clone();

        let encoded = tokio::task::spawn_blocking(move || encoder.encode(&frame.image))
            .await
            .unwrap_or_else(|e| Err(CodecError::EncodingFailed(e.to_string())));
        Some(encoded)
    }

    /// Send interval, `1 / frame_rate`
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shared handle to the latest-frame slot
    pub fn frames(&self) -> FrameSlot {
        self.latest.clone()
    }

    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.latest.latest()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OverflowPolicy;
    use image::Rgb;
    use std::time::Instant;

    fn frame(shade: u8) -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade]))
    }

    #[test]
    fn test_inactive_pipeline_only_updates_latest() {
        let pipeline = VideoPipeline::new(&VideoConfig::default());
        assert!(!pipeline.submit_frame(&frame(10)));
        assert_eq!(pipeline.queue_stats().len, 0);
        assert_eq!(pipeline.latest().unwrap().image.get_pixel(0, 0), &Rgb([10, 10, 10]));
    }

    #[test]
    fn test_burst_never_blocks_and_respects_capacity() {
        let pipeline = VideoPipeline::new(&VideoConfig::default());
        pipeline.activate();

        let start = Instant::now();
        let queued: Vec<bool> = (0..10).map(|i| pipeline.submit_frame(&frame(i))).collect();
        assert!(start.elapsed() < Duration::from_secs(1));

        // Drop-newest keeps the first two
        assert_eq!(queued, [true, true, false, false, false, false, false, false, false, false]);
        let stats = pipeline.queue_stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.dropped, 8);

        // The latest slot still follows every submission
        assert_eq!(pipeline.latest().unwrap().sequence, 9);
    }

    #[test]
    fn test_drop_oldest_keeps_freshest() {
        let config = VideoConfig {
            overflow: OverflowPolicy::DropOldest,
            ..VideoConfig::default()
        };
        let pipeline = VideoPipeline::new(&config);
        pipeline.activate();
        for i in 0..5 {
            assert!(pipeline.submit_frame(&frame(i)));
        }
        assert_eq!(pipeline.queue_stats().len, 2);
    }

    #[tokio::test]
    async fn test_next_encoded_produces_jpeg() {
        let pipeline = VideoPipeline::new(&VideoConfig::default());
        pipeline.activate();
        pipeline.submit_frame(&frame(200));

        let jpeg = pipeline
            .next_encoded(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(pipeline.encoder_stats().frames_encoded, 1);

        assert!(pipeline.next_encoded(Duration::from_millis(20)).await.is_none());
    }

    #[test]
    fn test_deactivate_discards_queue() {
        let pipeline = VideoPipeline::new(&VideoConfig::default());
        pipeline.activate();
        pipeline.submit_frame(&frame(1));
        pipeline.deactivate();
        assert_eq!(pipeline.queue_stats().len, 0);
        assert!(!pipeline.is_active());
    }
}
