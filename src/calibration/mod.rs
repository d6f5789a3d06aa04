//! Calibration: target grids, sample collection, model fitting and storage

pub mod grid;
pub mod persistence;
pub mod regressor;
pub mod session;

pub use grid::{define_grid, CalibrationRole, CalibrationTarget};
pub use persistence::CalibrationStore;
pub use regressor::{CalibrationQuality, FitReport, GazeRegressor, PointResidual};
pub use session::{
    CalibrationDataset, CalibrationOutcome, CalibrationPoint, CalibrationSession, PointProgress,
};
