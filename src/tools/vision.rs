//! Detection and identification collaborators
//!
//! Object detection and text-to-object ranking are provided by the
//! embedding application. [`DisabledVision`] stands in when none is
//! configured.

use image::RgbImage;
use serde::Serialize;

use crate::error::VisionError;
use crate::tracking::BoundingBox;

/// One detected object, box normalized to the image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
}

/// A detection scored against a text query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub detection: Detection,
    pub score: f32,
}

/// Finds objects in an image
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, VisionError>;
}

/// Ranks detections against a text description
pub trait ObjectIdentifier: Send + Sync {
    /// At most `top_k` matches, best first
    fn rank(
        &self,
        image: &RgbImage,
        query: &str,
        detections: &[Detection],
        top_k: usize,
    ) -> Result<Vec<RankedMatch>, VisionError>;
}

/// Detects nothing and matches nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVision;

impl ObjectDetector for DisabledVision {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        Ok(Vec::new())
    }
}

impl ObjectIdentifier for DisabledVision {
    fn rank(
        &self,
        _image: &RgbImage,
        _query: &str,
        _detections: &[Detection],
        _top_k: usize,
    ) -> Result<Vec<RankedMatch>, VisionError> {
        Ok(Vec::new())
    }
}
