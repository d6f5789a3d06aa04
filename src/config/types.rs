//! Configuration section types
//!
//! Every numeric constant here was tuned empirically; none is a fixed contract.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Calibration grid, collection and fitting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Grid size used for a full calibration (9 or 21)
    pub default_points: usize,
    /// Valid feature vectors gathered per target
    pub frames_per_point: usize,
    /// Frames without a face tolerated per target before it restarts
    pub max_missed_frames_per_point: u32,
    /// Restarts allowed per target before calibration aborts
    pub max_point_retries: u32,
    /// Polynomial expansion degree
    pub polynomial_degree: usize,
    /// Ridge regularization strength on standardized features
    pub ridge_alpha: f64,
    /// Fewest calibration points accepted by a fit
    pub min_points: usize,
    pub center_weight: f64,
    pub edge_weight: f64,
    pub corner_weight: f64,
    /// Keep every raw sample in the persisted dataset
    pub retain_raw_samples: bool,
    /// Nominal landmark frame rate, recorded in dataset metadata
    pub sampling_rate_hz: f64,
    /// Mean training error below this is good (pixels)
    pub good_error_px: f64,
    /// Mean training error below this is marginal (pixels)
    pub marginal_error_px: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_points: 21,
            frames_per_point: 60,
            max_missed_frames_per_point: 90,
            max_point_retries: 2,
            polynomial_degree: 3,
            ridge_alpha: 0.01,
            min_points: 9,
            center_weight: 1.0,
            edge_weight: 5.0,
            corner_weight: 9.0,
            retain_raw_samples: true,
            sampling_rate_hz: 30.0,
            good_error_px: 30.0,
            marginal_error_px: 50.0,
        }
    }
}

/// Vertical bias compensation for under-reach near the screen edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalBiasConfig {
    pub enabled: bool,
    /// Fraction of the half-height around center with no bias applied
    pub dead_zone: f64,
    /// Offset reached at the very top or bottom of the screen (pixels)
    pub max_offset_px: f64,
}

impl Default for VerticalBiasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dead_zone: 0.3,
            max_offset_px: 40.0,
        }
    }
}

/// Temporal filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Rolling window capacity in frames
    pub window_size: usize,
    /// Weight of the new windowed mean in the exponential blend
    pub smooth_factor: f64,
    /// Per-axis jump (pixels) treated as an outlier
    pub outlier_threshold_px: f64,
    pub vertical_bias: VerticalBiasConfig,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: 7,
            smooth_factor: 0.5,
            outlier_threshold_px: 200.0,
            vertical_bias: VerticalBiasConfig::default(),
        }
    }
}

/// Wink-to-click detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// EAR below this counts as closed
    pub ear_threshold: f64,
    /// Minimum time between two clicks
    pub cooldown_ms: f64,
    /// Normalized gaze y beyond which clicks are suppressed (bottom band)
    pub suppress_below: f64,
    /// Frames averaged per eye before thresholding
    pub history_len: usize,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.15,
            cooldown_ms: 500.0,
            suppress_below: 0.6,
            history_len: 1,
        }
    }
}

/// Runtime-adjustable tracking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub actuation_enabled: bool,
    pub smoothing_enabled: bool,
    pub gain: f64,
    pub gain_step: f64,
    pub min_gain: f64,
    pub max_gain: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            actuation_enabled: true,
            smoothing_enabled: true,
            gain: 1.0,
            gain_step: 0.1,
            min_gain: 0.5,
            max_gain: 2.0,
        }
    }
}

impl TrackingConfig {
    /// Set the gain, clamped to `[min_gain, max_gain]`
    pub fn set_gain(&mut self, gain: f64) -> f64 {
        if gain.is_finite() {
            self.gain = gain.clamp(self.min_gain, self.max_gain);
        }
        self.gain
    }

    pub fn adjust_gain(&mut self, steps: i32) -> f64 {
        self.set_gain(self.gain + steps as f64 * self.gain_step)
    }
}

/// Where calibration state is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub calibration_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            calibration_dir: PathBuf::from("calibration"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "gaze_cursor=info,gaze_cursor_lib=info".to_string(),
        }
    }
}
