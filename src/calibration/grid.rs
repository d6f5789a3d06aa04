//! Calibration target layouts
//!
//! Targets are laid out on normalized screen fractions and converted to
//! pixels for the session's screen. Each target carries a role that decides
//! its weight in the fit.

use crate::error::{GazeError, GazeResult};
use crate::screen::{ScreenGeometry, ScreenPoint};
use serde::{Deserialize, Serialize};

/// Fractions at or beyond these bounds count as an outer band
const OUTER_LOW: f64 = 0.1;
const OUTER_HIGH: f64 = 0.9;

const NINE_POINT_AXIS: [f64; 3] = [0.05, 0.5, 0.95];

const WIDE_ROW: [f64; 5] = [0.05, 0.275, 0.5, 0.725, 0.95];
const NARROW_ROW: [f64; 3] = [0.275, 0.5, 0.725];
const TWENTY_ONE_ROWS: [(f64, &[f64]); 5] = [
    (0.05, &WIDE_ROW),
    (0.3, &NARROW_ROW),
    (0.5, &WIDE_ROW),
    (0.7, &NARROW_ROW),
    (0.95, &WIDE_ROW),
];

/// Grid sizes accepted by [`define_grid`]
pub const SUPPORTED_GRID_SIZES: [usize; 2] = [9, 21];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationRole {
    Corner,
    Edge,
    Center,
}

impl CalibrationRole {
    /// Classify a target from its normalized screen position
    pub fn classify(fx: f64, fy: f64) -> Self {
        let outer = |f: f64| f <= OUTER_LOW || f >= OUTER_HIGH;
        match (outer(fx), outer(fy)) {
            (true, true) => Self::Corner,
            (true, false) | (false, true) => Self::Edge,
            (false, false) => Self::Center,
        }
    }
}

impl std::fmt::Display for CalibrationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corner => write!(f, "corner"),
            Self::Edge => write!(f, "edge"),
            Self::Center => write!(f, "center"),
        }
    }
}

/// One calibration target on screen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationTarget {
    pub index: usize,
    pub position: ScreenPoint,
    pub role: CalibrationRole,
}

impl CalibrationTarget {
    /// Build a target for an arbitrary pixel position, classifying its role
    pub fn at(index: usize, position: ScreenPoint, screen: ScreenGeometry) -> Self {
        let fx = position.x / screen.width.max(1) as f64;
        let fy = position.y / screen.height.max(1) as f64;
        Self {
            index,
            position,
            role: CalibrationRole::classify(fx, fy),
        }
    }
}

/// Ordered targets for an `n_points` calibration on `screen`
pub fn define_grid(n_points: usize, screen: ScreenGeometry) -> GazeResult<Vec<CalibrationTarget>> {
    let fractions: Vec<(f64, f64)> = match n_points {
        9 => NINE_POINT_AXIS
            .iter()
            .flat_map(|&fy| NINE_POINT_AXIS.iter().map(move |&fx| (fx, fy)))
            .collect(),
        21 => TWENTY_ONE_ROWS
            .iter()
            .flat_map(|&(fy, row)| row.iter().map(move |&fx| (fx, fy)))
            .collect(),
        other => {
            return Err(GazeError::Configuration(format!(
                "unsupported calibration grid size {} (supported: {:?})",
                other, SUPPORTED_GRID_SIZES
            )))
        }
    };

    Ok(fractions
        .into_iter()
        .enumerate()
        .map(|(index, (fx, fy))| CalibrationTarget {
            index,
            position: ScreenPoint::new(
                (fx * screen.width as f64).floor(),
                (fy * screen.height as f64).floor(),
            ),
            role: CalibrationRole::classify(fx, fy),
        })
        .collect())
}
