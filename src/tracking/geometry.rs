//! Normalized and pixel-space boxes

use serde::{Deserialize, Serialize};

/// Box relative to image size, top-left origin, every field in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp into the unit square so that `x + width <= 1` and
    /// `y + height <= 1`. Non-finite fields become zero.
    pub fn clamped(&self) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let x = unit(self.x);
        let y = unit(self.y);
        Self {
            x,
            y,
            width: unit(self.width).min(1.0 - x),
            height: unit(self.height).min(1.0 - y),
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Convert to pixels, truncating and keeping at least one pixel inside
    /// the frame.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelBox {
        let w = frame_width.max(1) as i32;
        let h = frame_height.max(1) as i32;
        let clamped = self.clamped();

        let x = ((clamped.x * w as f64) as i32).clamp(0, w - 1);
        let y = ((clamped.y * h as f64) as i32).clamp(0, h - 1);
        let width = ((clamped.width * w as f64) as i32).clamp(1, w - x);
        let height = ((clamped.height * h as f64) as i32).clamp(1, h - y);

        PixelBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a pixel box back to normalized coordinates, clamped
    pub fn from_pixels(pixels: PixelBox, frame_width: u32, frame_height: u32) -> Self {
        let w = f64::from(frame_width.max(1));
        let h = f64::from(frame_height.max(1));
        Self {
            x: f64::from(pixels.x) / w,
            y: f64::from(pixels.y) / h,
            width: f64::from(pixels.width) / w,
            height: f64::from(pixels.height) / h,
        }
        .clamped()
    }

    /// Largest per-field difference to another box
    pub fn max_abs_diff(&self, other: &BoundingBox) -> f64 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.width - other.width).abs())
            .max((self.height - other.height).abs())
    }
}

/// Box in frame pixels, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Shift by an offset
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Whether the box lies fully inside a `width x height` frame
    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && i64::from(self.x) + i64::from(self.width) <= i64::from(width)
            && i64::from(self.y) + i64::from(self.height) <= i64::from(height)
    }
}
