//! Screen geometry value types shared by calibration, smoothing and actuation

use serde::{Deserialize, Serialize};

/// Screen resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

impl ScreenGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Clamp a point into `[0, width - 1] x [0, height - 1]`
    pub fn clamp(&self, point: ScreenPoint) -> ScreenPoint {
        let max_x = (self.width.max(1) - 1) as f64;
        let max_y = (self.height.max(1) - 1) as f64;
        ScreenPoint::new(point.x.clamp(0.0, max_x), point.y.clamp(0.0, max_y))
    }

    /// Vertical position normalized to 0 (top) .. 1 (bottom)
    pub fn normalized_y(&self, y: f64) -> f64 {
        if self.height == 0 {
            return 0.5;
        }
        y / self.height as f64
    }
}

impl std::fmt::Display for ScreenGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A position in screen pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Point halfway between `self` and `other`
    pub fn midpoint(&self, other: ScreenPoint) -> ScreenPoint {
        ScreenPoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn distance(&self, other: ScreenPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}
