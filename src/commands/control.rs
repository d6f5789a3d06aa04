//! Runtime control commands
//!
//! Commands are produced by a control panel (or the single-key bindings
//! below) and applied to the [`TrackingLoop`] between frames.

use crate::error::GazeResult;
use crate::screen::ScreenPoint;
use crate::tracker::TrackingLoop;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "command")]
pub enum ControlCommand {
    StartActuation,
    StopActuation,
    ToggleActuation,
    /// Full recalibration on a 9 or 21 point grid
    Recalibrate { points: usize },
    /// Recollect one target and refit with the stored dataset
    RecalibratePoint { target: ScreenPoint },
    AbortCalibration,
    ToggleSmoothing,
    GainUp,
    GainDown,
    ResetSmoothing,
    Quit,
}

impl ControlCommand {
    /// Map a control-panel key to a command
    ///
    /// `r` recalibrates the point under the current cursor, so it needs a
    /// cursor position.
    pub fn from_key(key: char, cursor: Option<ScreenPoint>) -> Option<Self> {
        let command = match key {
            'c' => Self::Recalibrate { points: 9 },
            'f' => Self::Recalibrate { points: 21 },
            'r' => Self::RecalibratePoint { target: cursor? },
            's' => Self::ToggleActuation,
            'x' => Self::ToggleSmoothing,
            '+' | '=' => Self::GainUp,
            '-' | '_' => Self::GainDown,
            'z' => Self::ResetSmoothing,
            'a' => Self::AbortCalibration,
            'q' => Self::Quit,
            _ => return None,
        };
        Some(command)
    }

    /// Apply to `tracker`
    ///
    /// `Quit` only saves the calibration; stopping is up to whoever owns the
    /// loop.
    pub fn apply(&self, tracker: &mut TrackingLoop) -> GazeResult<()> {
        match *self {
            Self::StartActuation => tracker.set_actuation(true),
            Self::StopActuation => tracker.set_actuation(false),
            Self::ToggleActuation => {
                tracker.toggle_actuation();
            }
            Self::Recalibrate { points } => {
                tracker.begin_recalibration(points)?;
            }
            Self::RecalibratePoint { target } => tracker.begin_point_recalibration(target)?,
            Self::AbortCalibration => {
                if !tracker.abort_calibration() {
                    tracing::debug!("No calibration to abort");
                }
            }
            Self::ToggleSmoothing => {
                tracker.toggle_smoothing();
            }
            Self::GainUp => {
                tracker.adjust_gain(1);
            }
            Self::GainDown => {
                tracker.adjust_gain(-1);
            }
            Self::ResetSmoothing => tracker.reset_smoothing(),
            Self::Quit => {
                tracker.persist_on_exit();
            }
        }
        Ok(())
    }
}
