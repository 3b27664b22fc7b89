//! Per-frame visual tracker primitive
//!
//! The engine only needs "given a frame and a box, follow that box on
//! later frames". [`VisualTracker`] is that capability; [`TemplateTracker`]
//! is the built-in implementation, a grayscale template matched by sum of
//! absolute differences over every offset in a window around the previous
//! position.

use image::RgbImage;

use super::geometry::PixelBox;
use crate::error::TrackingError;

/// A single-object tracker
pub trait VisualTracker: Send {
    /// Start tracking `bbox` in `frame`
    fn init(&mut self, frame: &RgbImage, bbox: PixelBox) -> Result<(), TrackingError>;

    /// Locate the object in a new frame. `None` means the object was lost.
    fn update(&mut self, frame: &RgbImage) -> Option<PixelBox>;
}

/// Creates fresh tracker instances for the engine
pub trait TrackerBackend: Send + Sync {
    fn create(&self) -> Box<dyn VisualTracker>;
}

impl<F> TrackerBackend for F
where
    F: Fn() -> Box<dyn VisualTracker> + Send + Sync,
{
    fn create(&self) -> Box<dyn VisualTracker> {
        self()
    }
}

/// Template tracker tuning
#[derive(Debug, Clone, Copy)]
pub struct TemplateConfig {
    /// Search window half-size in pixels
    pub search_radius: i32,
    /// Mean absolute luma difference above which the match is rejected
    pub max_mean_diff: f64,
    /// Templates larger than this are subsampled to at most this many
    /// samples per axis
    pub max_samples_per_axis: i32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            search_radius: 24,
            max_mean_diff: 40.0,
            max_samples_per_axis: 32,
        }
    }
}

/// Backend producing [`TemplateTracker`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateBackend {
    pub config: TemplateConfig,
}

impl TrackerBackend for TemplateBackend {
    fn create(&self) -> Box<dyn VisualTracker> {
        Box::new(TemplateTracker::new(self.config))
    }
}

/// Grayscale template matcher
pub struct TemplateTracker {
    config: TemplateConfig,
    /// Sampled luma values, row-major `rows x cols`
    template: Vec<u8>,
    cols: i32,
    rows: i32,
    step: i32,
    last: Option<PixelBox>,
}

impl TemplateTracker {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            template: Vec::new(),
            cols: 0,
            rows: 0,
            step: 1,
            last: None,
        }
    }

    /// Last known position
    pub fn position(&self) -> Option<PixelBox> {
        self.last
    }

    /// Mean absolute difference of the template placed at `candidate`.
    /// Stops early once the running total exceeds `give_up`.
    fn score(&self, frame: &RgbImage, candidate: PixelBox, give_up: f64) -> f64 {
        let samples = self.template.len() as f64;
        let limit = give_up * samples;
        let mut total = 0u64;

        for row in 0..self.rows {
            let y = (candidate.y + row * self.step) as u32;
            for col in 0..self.cols {
                let x = (candidate.x + col * self.step) as u32;
                let expected = self.template[(row * self.cols + col) as usize];
                total += u64::from(luma(frame, x, y).abs_diff(expected));
            }
            if total as f64 > limit {
                return f64::INFINITY;
            }
        }

        total as f64 / samples
    }
}

impl VisualTracker for TemplateTracker {
    fn init(&mut self, frame: &RgbImage, bbox: PixelBox) -> Result<(), TrackingError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackingError::EmptyFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }
        if !bbox.fits_in(frame.width(), frame.height()) {
            return Err(TrackingError::InitFailed(format!(
                "box {:?} outside {}x{} frame",
                bbox,
                frame.width(),
                frame.height()
            )));
        }

        let longest = bbox.width.max(bbox.height);
        let max_samples = self.config.max_samples_per_axis.max(1);
        self.step = ((longest + max_samples - 1) / max_samples).max(1);
        self.cols = (bbox.width + self.step - 1) / self.step;
        self.rows = (bbox.height + self.step - 1) / self.step;

        self.template.clear();
        for row in 0..self.rows {
            for col in 0..self.cols {
                let x = (bbox.x + col * self.step) as u32;
                let y = (bbox.y + row * self.step) as u32;
                self.template.push(luma(frame, x, y));
            }
        }

        self.last = Some(bbox);
        Ok(())
    }

    fn update(&mut self, frame: &RgbImage) -> Option<PixelBox> {
        let last = self.last?;
        let (width, height) = (frame.width(), frame.height());
        let radius = self.config.search_radius.max(0);

        // Current position first so a static scene settles immediately
        let mut best_box = last;
        let mut best_score = if last.fits_in(width, height) {
            self.score(frame, last, f64::INFINITY)
        } else {
            f64::INFINITY
        };

        'search: for dy in -radius..=radius {
            for dx in -radius..=radius {
                if best_score == 0.0 {
                    break 'search;
                }
                if dx == 0 && dy == 0 {
                    continue;
                }
                let candidate = last.translated(dx, dy);
                if !candidate.fits_in(width, height) {
                    continue;
                }
                let score = self.score(frame, candidate, best_score);
                if score < best_score {
                    best_score = score;
                    best_box = candidate;
                }
            }
        }

        if !best_score.is_finite() || best_score > self.config.max_mean_diff {
            tracing::debug!("Template match rejected (mean diff {:.1})", best_score);
            return None;
        }

        self.last = Some(best_box);
        Some(best_box)
    }
}

fn luma(frame: &RgbImage, x: u32, y: u32) -> u8 {
    let [r, g, b] = frame.get_pixel(x, y).0;
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}
