//! Multi-object visual tracking
//!
//! The [`TrackingEngine`] owns every tracker; callers refer to them by id
//! only. Each tracker wraps a [`VisualTracker`] primitive and layers a
//! confidence heuristic on top of it.

pub mod engine;
pub mod geometry;
pub mod primitive;

use serde::{Deserialize, Serialize};

pub use engine::TrackingEngine;
pub use geometry::{BoundingBox, PixelBox};
pub use primitive::{TemplateBackend, TemplateConfig, TemplateTracker, TrackerBackend, VisualTracker};

/// Tracker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Tracking,
    Lost,
}

/// Result of one tracker after an update pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerUpdate {
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub status: TrackStatus,
}

/// Point-in-time view of a tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub id: String,
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub status: TrackStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
