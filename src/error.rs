//! Error taxonomy for the gaze pipeline
//!
//! Per-frame errors (`NoFaceDetected`, `FeatureExtraction`) are absorbed by the
//! tracking loop; calibration and persistence errors are surfaced to callers.

use crate::screen::ScreenGeometry;
use thiserror::Error;

/// Errors that can occur while extracting, calibrating, tracking or persisting
#[derive(Error, Debug)]
pub enum GazeError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("Calibration point {point_index} timed out after {retries} retries")]
    CalibrationPointTimeout { point_index: usize, retries: u32 },

    #[error("Calibration fit failed: {0}")]
    CalibrationFit(String),

    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Screen mismatch: calibrated for {found}, current screen is {expected}")]
    ScreenMismatch {
        expected: ScreenGeometry,
        found: ScreenGeometry,
    },

    #[error("Invalid calibration point index: expected {expected}, got {got}")]
    InvalidPointIndex { expected: usize, got: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Landmark source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GazeError {
    /// Errors that only invalidate the current frame
    pub fn is_per_frame(&self) -> bool {
        matches!(self, Self::NoFaceDetected | Self::FeatureExtraction(_))
    }

    pub(crate) fn schema(expected: impl ToString, found: impl ToString) -> Self {
        Self::SchemaMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Result type for gaze pipeline operations
pub type GazeResult<T> = Result<T, GazeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_classification() {
        assert!(GazeError::NoFaceDetected.is_per_frame());
        assert!(GazeError::FeatureExtraction("short".into()).is_per_frame());
        assert!(!GazeError::CalibrationFit("singular".into()).is_per_frame());
        assert!(!GazeError::Persistence("corrupt".into()).is_per_frame());
    }

    #[test]
    fn test_screen_mismatch_message() {
        let err = GazeError::ScreenMismatch {
            expected: ScreenGeometry::new(1920, 1080),
            found: ScreenGeometry::new(1280, 720),
        };
        assert_eq!(
            err.to_string(),
            "Screen mismatch: calibrated for 1280x720, current screen is 1920x1080"
        );
    }
}
