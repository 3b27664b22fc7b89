//! Tracker ownership and per-frame confidence bookkeeping

use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::geometry::BoundingBox;
use super::primitive::{TemplateBackend, TrackerBackend, VisualTracker};
use super::{TrackStatus, TrackerSnapshot, TrackerUpdate};
use crate::error::TrackingError;

/// Normalized areas outside this range count as implausible
pub const PLAUSIBLE_AREA: (f64, f64) = (0.001, 0.9);

/// Confidence lost per implausible update
pub const CONFIDENCE_DECAY: f64 = 0.1;

/// Confidence gained per plausible update
pub const CONFIDENCE_GAIN: f64 = 0.05;

/// Confidence never decays below this while the primitive succeeds
pub const CONFIDENCE_FLOOR: f64 = 0.3;

/// At or below this confidence a tracker is lost
pub const LOST_THRESHOLD: f64 = 0.3;

/// Absorbs float error from repeated decay steps
const EPSILON: f64 = 1e-9;

struct TrackerEntry {
    label: String,
    bbox: BoundingBox,
    confidence: f64,
    status: TrackStatus,
    created_at: DateTime<Utc>,
    primitive: Box<dyn VisualTracker>,
}

impl TrackerEntry {
    fn update(&self) -> TrackerUpdate {
        TrackerUpdate {
            label: self.label.clone(),
            bbox: self.bbox,
            confidence: self.confidence,
            status: self.status,
        }
    }

    fn snapshot(&self, id: &str) -> TrackerSnapshot {
        TrackerSnapshot {
            id: id.to_string(),
            label: self.label.clone(),
            bbox: self.bbox,
            confidence: self.confidence,
            status: self.status,
            created_at: self.created_at,
        }
    }

    /// Run the primitive on a new frame and apply the confidence rules
    fn advance(&mut self, frame: &RgbImage) {
        match self.primitive.update(frame) {
            Some(pixels) => {
                self.bbox = BoundingBox::from_pixels(pixels, frame.width(), frame.height());

                let area = self.bbox.area();
                if area < PLAUSIBLE_AREA.0 || area > PLAUSIBLE_AREA.1 {
                    self.confidence = (self.confidence - CONFIDENCE_DECAY).max(CONFIDENCE_FLOOR);
                } else {
                    self.confidence = (self.confidence + CONFIDENCE_GAIN).min(1.0);
                }

                if self.confidence <= LOST_THRESHOLD + EPSILON {
                    self.status = TrackStatus::Lost;
                }
            }
            None => {
                self.confidence = 0.0;
                self.status = TrackStatus::Lost;
            }
        }
    }
}

/// Owns all trackers. The map sits behind a single mutex so `create`,
/// `remove` and `update_all` may run from different threads.
pub struct TrackingEngine {
    backend: Arc<dyn TrackerBackend>,
    trackers: Mutex<HashMap<String, TrackerEntry>>,
}

impl TrackingEngine {
    pub fn new(backend: Arc<dyn TrackerBackend>) -> Self {
        Self {
            backend,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Engine backed by the built-in template tracker
    pub fn with_template_tracker() -> Self {
        Self::new(Arc::new(TemplateBackend::default()))
    }

    /// Start tracking `bbox` (normalized) in `frame`. Returns the new id.
    pub fn create(
        &self,
        frame: &RgbImage,
        bbox: BoundingBox,
        label: &str,
    ) -> Result<String, TrackingError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackingError::EmptyFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }

        let bbox = bbox.clamped();
        let pixels = bbox.to_pixels(frame.width(), frame.height());

        let mut primitive = self.backend.create();
        primitive.init(frame, pixels)?;

        let id = Uuid::new_v4().to_string();
        self.trackers.lock().insert(
            id.clone(),
            TrackerEntry {
                label: label.to_string(),
                bbox,
                confidence: 1.0,
                status: TrackStatus::Tracking,
                created_at: Utc::now(),
                primitive,
            },
        );

        tracing::info!("Created tracker {} for '{}' at {:?}", id, label, pixels);
        Ok(id)
    }

    /// Advance every tracking tracker by one frame.
    ///
    /// Lost trackers are reported with their last box and zero
    /// confidence, and are not re-evaluated.
    pub fn update_all(&self, frame: &RgbImage) -> HashMap<String, TrackerUpdate> {
        let mut trackers = self.trackers.lock();
        let mut results = HashMap::with_capacity(trackers.len());

        for (id, entry) in trackers.iter_mut() {
            if entry.status == TrackStatus::Lost {
                let mut update = entry.update();
                update.confidence = 0.0;
                results.insert(id.clone(), update);
                continue;
            }

            entry.advance(frame);
            if entry.status == TrackStatus::Lost {
                tracing::info!(
                    "Tracker {} ('{}') lost at confidence {:.2}",
                    id,
                    entry.label,
                    entry.confidence
                );
            }
            results.insert(id.clone(), entry.update());
        }

        results
    }

    /// Remove a tracker. Returns `false` for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.trackers.lock().remove(id).is_some();
        if removed {
            tracing::debug!("Removed tracker {}", id);
        }
        removed
    }

    /// Remove every tracker, returning how many there were
    pub fn remove_all(&self) -> usize {
        let mut trackers = self.trackers.lock();
        let count = trackers.len();
        trackers.clear();
        count
    }

    /// Ids of trackers still tracking
    pub fn list_active(&self) -> Vec<String> {
        self.trackers
            .lock()
            .iter()
            .filter(|(_, entry)| entry.status == TrackStatus::Tracking)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of one tracker
    pub fn get(&self, id: &str) -> Option<TrackerSnapshot> {
        self.trackers.lock().get(id).map(|entry| entry.snapshot(id))
    }

    /// Snapshot of every tracker, oldest first
    pub fn snapshot(&self) -> Vec<TrackerSnapshot> {
        let mut all: Vec<TrackerSnapshot> = self
            .trackers
            .lock()
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    /// Number of trackers, lost ones included
    pub fn len(&self) -> usize {
        self.trackers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TrackingEngine {
    fn default() -> Self {
        Self::with_template_tracker()
    }
}
