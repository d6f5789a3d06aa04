//! Live gaze tracking
//!
//! Ties feature extraction, the fitted regressor, smoothing and blink
//! detection together, and drives the cursor actuator.

pub mod actuator;
pub mod runtime;
pub mod tracking_loop;

pub use actuator::{Actuator, NullActuator, RecordingActuator};
pub use runtime::{spawn, TrackingHandle, TrackingSnapshot};
pub use tracking_loop::{
    CalibrationResult, CalibrationStatus, FrameReport, TrackingLoop, TrackingMode, TrackingStats,
};
