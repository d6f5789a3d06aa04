//! Configuration management
//!
//! Loads a TOML file into [`GazeConfig`]. Every section is optional and falls
//! back to its defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod types;

pub use types::{
    BlinkConfig, CalibrationConfig, LoggingConfig, SmoothingConfig, StorageConfig,
    TrackingConfig, VerticalBiasConfig,
};

use crate::calibration::regressor::MAX_DEGREE;
use crate::capture::landmarks::LandmarkLayout;
use crate::screen::ScreenGeometry;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Screen the cursor is driven on
    pub screen: ScreenGeometry,
    /// Landmark indices used by feature extraction and blink detection
    pub landmarks: LandmarkLayout,
    pub calibration: CalibrationConfig,
    pub smoothing: SmoothingConfig,
    pub blink: BlinkConfig,
    pub tracking: TrackingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            screen: ScreenGeometry::new(1920, 1080),
            landmarks: LandmarkLayout::default(),
            calibration: CalibrationConfig::default(),
            smoothing: SmoothingConfig::default(),
            blink: BlinkConfig::default(),
            tracking: TrackingConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GazeConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: GazeConfig = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.screen.width == 0 || self.screen.height == 0 {
            bail!("Screen dimensions must be non-zero (got {})", self.screen);
        }

        let cal = &self.calibration;
        if !matches!(cal.default_points, 9 | 21) {
            bail!(
                "calibration.default_points must be 9 or 21 (got {})",
                cal.default_points
            );
        }
        if cal.frames_per_point == 0 {
            bail!("calibration.frames_per_point must be at least 1");
        }
        if cal.polynomial_degree == 0 || cal.polynomial_degree > MAX_DEGREE {
            bail!(
                "calibration.polynomial_degree must be in 1..={} (got {})",
                MAX_DEGREE,
                cal.polynomial_degree
            );
        }
        if !(cal.ridge_alpha >= 0.0) {
            bail!("calibration.ridge_alpha must be non-negative");
        }
        for (name, w) in [
            ("center_weight", cal.center_weight),
            ("edge_weight", cal.edge_weight),
            ("corner_weight", cal.corner_weight),
        ] {
            if !(w > 0.0) || !w.is_finite() {
                bail!("calibration.{} must be positive (got {})", name, w);
            }
        }

        if !(cal.good_error_px > 0.0) || !(cal.good_error_px <= cal.marginal_error_px) {
            bail!(
                "calibration error grades need 0 < good_error_px <= marginal_error_px (got {} and {})",
                cal.good_error_px,
                cal.marginal_error_px
            );
        }

        let sm = &self.smoothing;
        if sm.window_size == 0 {
            bail!("smoothing.window_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&sm.smooth_factor) {
            bail!(
                "smoothing.smooth_factor must be in [0, 1] (got {})",
                sm.smooth_factor
            );
        }
        if !(sm.outlier_threshold_px > 0.0) {
            bail!("smoothing.outlier_threshold_px must be positive");
        }
        if !(0.0..1.0).contains(&sm.vertical_bias.dead_zone) {
            bail!("smoothing.vertical_bias.dead_zone must be in [0, 1)");
        }
        if !(sm.vertical_bias.max_offset_px >= 0.0) || !sm.vertical_bias.max_offset_px.is_finite() {
            bail!(
                "smoothing.vertical_bias.max_offset_px must be non-negative (got {})",
                sm.vertical_bias.max_offset_px
            );
        }

        let blink = &self.blink;
        if !(blink.ear_threshold > 0.0) {
            bail!("blink.ear_threshold must be positive");
        }
        if blink.history_len == 0 {
            bail!("blink.history_len must be at least 1");
        }
        if !(blink.cooldown_ms >= 0.0) {
            bail!("blink.cooldown_ms must be non-negative");
        }
        if !(0.0..=1.0).contains(&blink.suppress_below) {
            bail!(
                "blink.suppress_below must be in [0, 1] (got {})",
                blink.suppress_below
            );
        }

        let tracking = &self.tracking;
        if !(tracking.min_gain > 0.0) || tracking.min_gain > tracking.max_gain {
            bail!(
                "tracking gain bounds are invalid ({}..{})",
                tracking.min_gain,
                tracking.max_gain
            );
        }
        if !(tracking.min_gain..=tracking.max_gain).contains(&tracking.gain) {
            bail!(
                "tracking.gain {} is outside [{}, {}]",
                tracking.gain,
                tracking.min_gain,
                tracking.max_gain
            );
        }
        if !(tracking.gain_step > 0.0) || !tracking.gain_step.is_finite() {
            bail!(
                "tracking.gain_step must be positive (got {})",
                tracking.gain_step
            );
        }

        Ok(())
    }
}
