//! JPEG encoder wrapper
//!
//! Encodes sampled camera frames at a fixed quality before they are sent to
//! the agent.

use bytes::Bytes;
use image::codecs::jpeg;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CodecError;

/// JPEG encoder with running statistics
pub struct JpegEncoder {
    quality: u8,
    frames_encoded: AtomicU64,
    bytes_produced: AtomicU64,
}

impl JpegEncoder {
    /// Create an encoder. Quality is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            frames_encoded: AtomicU64::new(0),
            bytes_produced: AtomicU64::new(0),
        }
    }

    /// Encode an RGB frame to JPEG bytes
    pub fn encode(&self, frame: &RgbImage) -> Result<Bytes, CodecError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CodecError::EncodingFailed(format!(
                "empty frame {}x{}",
                frame.width(),
                frame.height()
            )));
        }

        // Rough pre-size: JPEG at mid quality lands well under 1 byte/pixel
        let mut buffer = Vec::with_capacity((frame.width() * frame.height() / 4) as usize);
        jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(frame)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_produced
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);

        Ok(Bytes::from(buffer))
    }

    /// Get the configured quality
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_produced = self.bytes_produced.load(Ordering::Relaxed);
        EncoderStats {
            frames_encoded,
            bytes_produced,
            average_frame_size: if frames_encoded > 0 {
                bytes_produced as f32 / frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
