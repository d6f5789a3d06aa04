//! Wink-to-click detection
//!
//! A left-eye wink (left eye closed while the right stays open) produces a
//! left click. Both-eyes-closed blinks are ignored. Clicks are debounced by a
//! cooldown and suppressed while the gaze sits in the bottom band of the
//! screen, where the control panel lives.

use crate::capture::features::{eye_aspect_ratio, FrameGeometry};
use crate::capture::landmarks::{LandmarkFrame, LandmarkLayout};
use crate::config::BlinkConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A click produced by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub button: MouseButton,
    pub timestamp_ms: f64,
    pub left_ear: f64,
    pub right_ear: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlinkPhase {
    #[default]
    Open,
    /// A click fired and the cooldown has not yet elapsed
    Fired,
}

/// Detector memory carried between frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkState {
    pub left_history: VecDeque<f64>,
    pub right_history: VecDeque<f64>,
    pub last_click_ms: Option<f64>,
    pub suppressed: bool,
    pub phase: BlinkPhase,
}

#[derive(Debug, Clone)]
pub struct BlinkDetector {
    config: BlinkConfig,
    layout: LandmarkLayout,
    state: BlinkState,
}

impl BlinkDetector {
    pub fn new(config: BlinkConfig, layout: LandmarkLayout) -> Self {
        Self {
            config,
            layout,
            state: BlinkState::default(),
        }
    }

    pub fn state(&self) -> &BlinkState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = BlinkState::default();
    }

    /// Feed one frame; `gaze_y` is the current gaze height normalized to
    /// 0 (top) .. 1 (bottom)
    ///
    /// Frames without a face or with malformed landmarks leave the state
    /// untouched.
    pub fn update(&mut self, frame: &LandmarkFrame, gaze_y: f64) -> Option<ClickEvent> {
        let face = frame.face.as_ref()?;
        let geometry = FrameGeometry::validate(frame, face, &self.layout).ok()?;

        let left = eye_aspect_ratio(face, &self.layout.left_eye, geometry);
        let right = eye_aspect_ratio(face, &self.layout.right_eye, geometry);
        if !left.is_finite() || !right.is_finite() {
            return None;
        }

        let history_len = self.config.history_len.max(1);
        let left_ear = push_and_average(&mut self.state.left_history, left, history_len);
        let right_ear = push_and_average(&mut self.state.right_history, right, history_len);

        let now = frame.timestamp_ms;
        let cooled_down = self
            .state
            .last_click_ms
            .map_or(true, |last| now - last >= self.config.cooldown_ms);

        if self.state.phase == BlinkPhase::Fired && cooled_down {
            self.state.phase = BlinkPhase::Open;
        }

        self.state.suppressed = !gaze_y.is_finite() || gaze_y > self.config.suppress_below;

        let winking =
            left_ear < self.config.ear_threshold && right_ear >= self.config.ear_threshold;
        if !winking || self.state.phase != BlinkPhase::Open {
            return None;
        }
        if self.state.suppressed {
            tracing::trace!("Wink ignored in bottom band (gaze_y {:.2})", gaze_y);
            return None;
        }

        self.state.phase = BlinkPhase::Fired;
        self.state.last_click_ms = Some(now);
        tracing::debug!(
            "Wink click at {:.0}ms (left EAR {:.3}, right EAR {:.3})",
            now,
            left_ear,
            right_ear
        );
        Some(ClickEvent {
            button: MouseButton::Left,
            timestamp_ms: now,
            left_ear,
            right_ear,
        })
    }
}

fn push_and_average(history: &mut VecDeque<f64>, value: f64, capacity: usize) -> f64 {
    while history.len() >= capacity {
        history.pop_front();
    }
    history.push_back(value);
    history.iter().sum::<f64>() / history.len() as f64
}
