//! Real-time gaze smoothing
//!
//! Turns per-frame regressor output into stable cursor motion. Every frame
//! passes through the same stages in order: outlier damping, windowed
//! average, exponential smoothing, optional vertical bias and gain scaling.

use crate::config::{SmoothingConfig, VerticalBiasConfig};
use crate::screen::ScreenPoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Filter memory carried between frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmoothingState {
    /// Recent (possibly damped) predictions, oldest first
    pub window: VecDeque<ScreenPoint>,
    /// Last exponential-smoothing output, before bias and gain
    pub last_filtered: Option<ScreenPoint>,
    /// Last position handed to the caller
    pub last_emitted: Option<ScreenPoint>,
}

impl SmoothingState {
    pub fn is_empty(&self) -> bool {
        self.window.is_empty() && self.last_filtered.is_none()
    }
}

/// Multi-stage temporal filter for raw gaze predictions
#[derive(Debug, Clone)]
pub struct SmoothingPipeline {
    config: SmoothingConfig,
    gain: f64,
    state: SmoothingState,
}

impl SmoothingPipeline {
    pub fn new(config: SmoothingConfig) -> Self {
        let state = SmoothingState {
            window: VecDeque::with_capacity(config.window_size),
            ..Default::default()
        };
        Self {
            config,
            gain: 1.0,
            state,
        }
    }

    pub fn config(&self) -> &SmoothingConfig {
        &self.config
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f64) {
        if gain.is_finite() && gain > 0.0 {
            self.gain = gain;
        }
    }

    pub fn state(&self) -> &SmoothingState {
        &self.state
    }

    /// Swap in a previously saved state (used when a calibration is aborted)
    pub fn restore(&mut self, state: SmoothingState) {
        self.state = state;
        while self.state.window.len() > self.config.window_size {
            self.state.window.pop_front();
        }
    }

    /// Clear the rolling window and every position memory
    pub fn reset(&mut self) {
        self.state.window.clear();
        self.state.last_filtered = None;
        self.state.last_emitted = None;
        tracing::debug!("Smoothing state reset");
    }

    /// Run one frame through all stages
    ///
    /// Non-finite input leaves the state untouched and returns the last
    /// emitted position (or the screen center if there is none).
    pub fn step(&mut self, raw: ScreenPoint, center: ScreenPoint) -> ScreenPoint {
        if !raw.is_finite() {
            tracing::warn!("Rejected non-finite prediction ({}, {})", raw.x, raw.y);
            return self.state.last_emitted.unwrap_or(center);
        }

        let last = *self.state.last_filtered.get_or_insert(raw);

        let damped = if is_outlier(raw, last, self.config.outlier_threshold_px) {
            tracing::trace!("Damping outlier ({:.0}, {:.0})", raw.x, raw.y);
            raw.midpoint(last)
        } else {
            raw
        };

        if self.state.window.len() >= self.config.window_size {
            self.state.window.pop_front();
        }
        self.state.window.push_back(damped);
        let mean = window_mean(&self.state.window);

        let f = self.config.smooth_factor;
        let filtered = ScreenPoint::new(
            mean.x * f + last.x * (1.0 - f),
            mean.y * f + last.y * (1.0 - f),
        );
        self.state.last_filtered = Some(filtered);

        let output = self.finish(filtered, raw, center);
        self.state.last_emitted = Some(output);
        output
    }

    /// Apply only bias and gain, for use while smoothing is disabled
    ///
    /// The filter memory is cleared so re-enabling smoothing starts fresh.
    pub fn passthrough(&mut self, raw: ScreenPoint, center: ScreenPoint) -> ScreenPoint {
        if !raw.is_finite() {
            return self.state.last_emitted.unwrap_or(center);
        }
        self.state.window.clear();
        self.state.last_filtered = None;
        let output = self.finish(raw, raw, center);
        self.state.last_emitted = Some(output);
        output
    }

    fn finish(&self, value: ScreenPoint, raw: ScreenPoint, center: ScreenPoint) -> ScreenPoint {
        let biased = ScreenPoint::new(
            value.x,
            value.y + vertical_bias(raw.y, center.y, &self.config.vertical_bias),
        );
        ScreenPoint::new(
            center.x + (biased.x - center.x) * self.gain,
            center.y + (biased.y - center.y) * self.gain,
        )
    }
}

/// Per-axis jump test against the previous filtered position
pub fn is_outlier(raw: ScreenPoint, last: ScreenPoint, threshold_px: f64) -> bool {
    (raw.x - last.x).abs() > threshold_px || (raw.y - last.y).abs() > threshold_px
}

fn window_mean(window: &VecDeque<ScreenPoint>) -> ScreenPoint {
    let n = window.len().max(1) as f64;
    let (sx, sy) = window
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    ScreenPoint::new(sx / n, sy / n)
}

/// Offset toward the nearer vertical edge when the raw position is far from
/// center; zero inside the dead zone, `max_offset_px` at the edge
pub fn vertical_bias(raw_y: f64, center_y: f64, config: &VerticalBiasConfig) -> f64 {
    if !config.enabled || center_y <= 0.0 {
        return 0.0;
    }
    let normalized = ((raw_y - center_y) / center_y).clamp(-1.0, 1.0);
    let magnitude = normalized.abs();
    if magnitude <= config.dead_zone {
        return 0.0;
    }
    let scale = (magnitude - config.dead_zone) / (1.0 - config.dead_zone);
    normalized.signum() * scale * config.max_offset_px
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: ScreenPoint = ScreenPoint { x: 960.0, y: 540.0 };

    fn pipeline() -> SmoothingPipeline {
        SmoothingPipeline::new(SmoothingConfig::default())
    }

    #[test]
    fn test_first_frame_passes_through() {
        let mut p = pipeline();
        let out = p.step(ScreenPoint::new(300.0, 200.0), CENTER);
        assert_eq!(out, ScreenPoint::new(300.0, 200.0));
    }

    #[test]
    fn test_reset_then_same_input_is_idempotent() {
        let mut p = pipeline();
        for i in 0..20 {
            p.step(ScreenPoint::new(100.0 + i as f64 * 30.0, 700.0), CENTER);
        }
        p.reset();
        assert!(p.state().is_empty());

        let input = ScreenPoint::new(812.0, 333.0);
        let first = p.step(input, CENTER);
        let second = p.step(input, CENTER);
        assert_eq!(first, second);
    }

    #[test]
    fn test_outlier_moves_at_most_halfway() {
        let mut p = pipeline();
        let converged = ScreenPoint::new(500.0, 500.0);
        for _ in 0..20 {
            p.step(converged, CENTER);
        }

        let outlier = ScreenPoint::new(1500.0, 900.0);
        let out = p.step(outlier, CENTER);
        let halfway = converged.midpoint(outlier);

        assert!(out.x <= halfway.x, "x {} moved past {}", out.x, halfway.x);
        assert!(out.y <= halfway.y, "y {} moved past {}", out.y, halfway.y);
        assert!(out.x > converged.x);
    }

    #[test]
    fn test_small_moves_are_not_damped() {
        assert!(!is_outlier(
            ScreenPoint::new(150.0, 100.0),
            ScreenPoint::new(0.0, 0.0),
            200.0
        ));
        assert!(is_outlier(
            ScreenPoint::new(0.0, 250.0),
            ScreenPoint::new(0.0, 0.0),
            200.0
        ));
    }

    #[test]
    fn test_smoothing_reduces_jitter() {
        let mut p = pipeline();
        let mut raw_dev = 0.0;
        let mut smooth_dev = 0.0;
        for i in 0..120 {
            let jitter = if i % 2 == 0 { 15.0 } else { -15.0 };
            let raw = ScreenPoint::new(800.0 + jitter, 400.0 - jitter);
            let out = p.step(raw, CENTER);
            if i > 10 {
                raw_dev += (raw.x - 800.0).abs();
                smooth_dev += (out.x - 800.0).abs();
            }
        }
        assert!(
            smooth_dev < raw_dev / 2.0,
            "smoothed deviation {} should be well below raw {}",
            smooth_dev,
            raw_dev
        );
    }

    #[test]
    fn test_gain_scales_offset_from_center() {
        let mut p = pipeline();
        p.set_gain(1.5);
        let out = p.step(ScreenPoint::new(1160.0, 440.0), CENTER);
        assert!((out.x - 1260.0).abs() < 1e-9);
        assert!((out.y - 390.0).abs() < 1e-9);
    }

    #[test]
    fn test_gain_does_not_compound() {
        let mut p = pipeline();
        p.set_gain(2.0);
        let target = ScreenPoint::new(1060.0, 540.0);
        let mut out = CENTER;
        for _ in 0..50 {
            out = p.step(target, CENTER);
        }
        assert!((out.x - 1160.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic_sequences() {
        let inputs: Vec<ScreenPoint> = (0..40)
            .map(|i| ScreenPoint::new((i * 37 % 1900) as f64, (i * 53 % 1000) as f64))
            .collect();
        let mut a = pipeline();
        let mut b = pipeline();
        let out_a: Vec<_> = inputs.iter().map(|p| a.step(*p, CENTER)).collect();
        let out_b: Vec<_> = inputs.iter().map(|p| b.step(*p, CENTER)).collect();
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_non_finite_input_keeps_state() {
        let mut p = pipeline();
        let good = p.step(ScreenPoint::new(400.0, 300.0), CENTER);
        let before = p.state().clone();
        let out = p.step(ScreenPoint::new(f64::NAN, 10.0), CENTER);
        assert_eq!(out, good);
        assert_eq!(p.state(), &before);
    }

    #[test]
    fn test_window_capacity_is_bounded() {
        let mut p = pipeline();
        for i in 0..30 {
            p.step(ScreenPoint::new(i as f64, i as f64), CENTER);
        }
        assert_eq!(p.state().window.len(), 7);
    }

    #[test]
    fn test_vertical_bias_is_bounded_and_directional() {
        let config = VerticalBiasConfig {
            enabled: true,
            dead_zone: 0.3,
            max_offset_px: 40.0,
        };
        assert_eq!(vertical_bias(540.0, 540.0, &config), 0.0);
        assert_eq!(vertical_bias(600.0, 540.0, &config), 0.0);
        assert!((vertical_bias(1080.0, 540.0, &config) - 40.0).abs() < 1e-9);
        assert!((vertical_bias(0.0, 540.0, &config) + 40.0).abs() < 1e-9);
        assert!(vertical_bias(5000.0, 540.0, &config) <= 40.0);

        let disabled = VerticalBiasConfig::default();
        assert_eq!(vertical_bias(1080.0, 540.0, &disabled), 0.0);
    }

    #[test]
    fn test_passthrough_applies_gain_only() {
        let mut p = pipeline();
        p.set_gain(0.5);
        let out = p.passthrough(ScreenPoint::new(1160.0, 540.0), CENTER);
        assert_eq!(out, ScreenPoint::new(1060.0, 540.0));
        assert!(p.state().window.is_empty());
    }
}
