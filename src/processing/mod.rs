//! Per-frame signal processing
//!
//! Temporal smoothing of regressor output and wink-to-click detection, both
//! driven by the tracking loop once per landmark frame.

pub mod blink;
pub mod smoothing;

pub use blink::{BlinkDetector, BlinkPhase, BlinkState, ClickEvent, MouseButton};
pub use smoothing::{SmoothingPipeline, SmoothingState};
