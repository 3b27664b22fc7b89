//! `highlightObject`: find the named object in the current frame and
//! start tracking it

use std::sync::Arc;
use thiserror::Error;

use crate::constants::DEFAULT_MATCH_THRESHOLD;
use crate::error::{TrackingError, VisionError};
use crate::events::{EventSink, SessionEvent};
use crate::protocol::{ToolCall, HIGHLIGHT_OBJECT_TOOL, OBJECT_NAME_ARG};
use crate::tools::vision::{ObjectDetector, ObjectIdentifier};
use crate::tools::ToolHandler;
use crate::tracking::TrackingEngine;
use crate::video::FrameSlot;

/// Reasons a highlight request fails, rendered into the tool response
#[derive(Debug, Error)]
enum HighlightError {
    #[error("missing '{}' argument", OBJECT_NAME_ARG)]
    MissingObjectName,

    #[error("No video frame available")]
    NoFrame,

    #[error("No objects detected in frame")]
    NoDetections,

    #[error("Could not find '{0}' in frame")]
    NoMatch(String),

    #[error("Could not find '{name}' in frame (best match score {score:.2})")]
    LowScore { name: String, score: f32 },

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

/// Connects tool calls to the vision collaborators and the tracking engine
pub struct ToolCallBridge {
    detector: Arc<dyn ObjectDetector>,
    identifier: Arc<dyn ObjectIdentifier>,
    tracking: Arc<TrackingEngine>,
    frames: FrameSlot,
    events: EventSink,
    match_threshold: f32,
    top_k: usize,
}

impl ToolCallBridge {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        identifier: Arc<dyn ObjectIdentifier>,
        tracking: Arc<TrackingEngine>,
        frames: FrameSlot,
        events: EventSink,
    ) -> Self {
        Self {
            detector,
            identifier,
            tracking,
            frames,
            events,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            top_k: 3,
        }
    }

    /// Minimum identification score to accept a match
    pub fn with_match_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    fn highlight(&self, call: &ToolCall) -> Result<String, HighlightError> {
        let name = call
            .str_arg(OBJECT_NAME_ARG)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(HighlightError::MissingObjectName)?;

        let frame = self.frames.latest().ok_or(HighlightError::NoFrame)?;
        tracing::info!("Detecting '{}' in frame {}", name, frame.sequence);

        let detections = self.detector.detect(&frame.image)?;
        tracing::debug!("Detector found {} objects", detections.len());
        if detections.is_empty() {
            return Err(HighlightError::NoDetections);
        }

        let ranked = self
            .identifier
            .rank(&frame.image, name, &detections, self.top_k)?;
        let best = ranked
            .into_iter()
            .next()
            .ok_or_else(|| HighlightError::NoMatch(name.to_string()))?;

        tracing::info!(
            "Best match for '{}': {} (score {:.2})",
            name,
            best.detection.class_name,
            best.score
        );
        if best.score < self.match_threshold {
            return Err(HighlightError::LowScore {
                name: name.to_string(),
                score: best.score,
            });
        }

        let bbox = best.detection.bbox;
        let tracker_id = self.tracking.create(&frame.image, bbox, name)?;

        self.events.emit(SessionEvent::ObjectHighlighted {
            tracker_id,
            label: name.to_string(),
            bbox: bbox.clamped(),
            score: best.score,
        });

        Ok(format!("Successfully tracking {}", name))
    }
}

impl ToolHandler for ToolCallBridge {
    fn handle(&self, call: &ToolCall) -> String {
        if call.name != HIGHLIGHT_OBJECT_TOOL {
            tracing::warn!("Unknown tool '{}' ({})", call.name, call.call_id);
            return format!("Error: unknown tool '{}'", call.name);
        }

        match self.highlight(call) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("highlightObject failed: {}", e);
                format!("Error: {}", e)
            }
        }
    }
}
