//! On-disk calibration storage
//!
//! Two pretty-printed JSON files live in the calibration directory: the
//! dataset (aggregated points, optional raw samples, training error) and the
//! fitted model. Both are written through a temp file in the same directory
//! and renamed into place.

use crate::calibration::regressor::GazeRegressor;
use crate::calibration::session::CalibrationDataset;
use crate::error::{GazeError, GazeResult};
use crate::screen::ScreenGeometry;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DATASET_FILE: &str = "calibration_dataset.json";
pub const MODEL_FILE: &str = "gaze_model.json";

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.dir.join(DATASET_FILE)
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn exists(&self) -> bool {
        self.dataset_path().is_file() && self.model_path().is_file()
    }

    /// Persist the dataset and model
    pub fn save(&self, dataset: &CalibrationDataset, regressor: &GazeRegressor) -> GazeResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let dataset_json = serde_json::to_vec_pretty(dataset)
            .map_err(|e| GazeError::Persistence(e.to_string()))?;
        self.write_atomic(&self.dataset_path(), &dataset_json)?;
        self.write_atomic(&self.model_path(), regressor.to_json()?.as_bytes())?;
        tracing::info!(
            "Saved calibration {} ({} points) to {}",
            dataset.session_id,
            dataset.points.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Load a stored calibration for `screen`
    ///
    /// `Ok(None)` when nothing is stored. A stored calibration for another
    /// resolution is a `ScreenMismatch` error.
    pub fn load(&self, screen: ScreenGeometry) -> GazeResult<Option<(CalibrationDataset, GazeRegressor)>> {
        if !self.exists() {
            return Ok(None);
        }
        let dataset = Self::load_dataset(&self.dataset_path())?;
        if dataset.screen != screen {
            return Err(GazeError::ScreenMismatch {
                expected: screen,
                found: dataset.screen,
            });
        }
        let model_json = std::fs::read_to_string(self.model_path())?;
        let regressor = GazeRegressor::from_json(&model_json)?;
        tracing::info!(
            "Loaded calibration {} from {}",
            dataset.session_id,
            self.dir.display()
        );
        Ok(Some((dataset, regressor)))
    }

    /// Read and validate a dataset file
    pub fn load_dataset(path: &Path) -> GazeResult<CalibrationDataset> {
        let content = std::fs::read_to_string(path)?;
        let dataset: CalibrationDataset = serde_json::from_str(&content)
            .map_err(|e| GazeError::Persistence(format!("{}: {}", path.display(), e)))?;
        dataset.validate()?;
        Ok(dataset)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> GazeResult<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| GazeError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::session::fixtures::{collect_all, config, linear_features};
    use crate::calibration::session::CalibrationSession;
    use tempfile::TempDir;

    const SCREEN: ScreenGeometry = ScreenGeometry {
        width: 1920,
        height: 1080,
    };

    fn calibrated() -> (CalibrationDataset, GazeRegressor) {
        let mut session = CalibrationSession::new(config(), SCREEN);
        session.define_grid(9).unwrap();
        collect_all(&mut session);
        let outcome = session.finalize().unwrap();
        (outcome.dataset, outcome.regressor)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = CalibrationStore::new(tmp.path().join("calibration"));
        let (dataset, regressor) = calibrated();

        assert!(store.load(SCREEN).unwrap().is_none());
        store.save(&dataset, &regressor).unwrap();
        assert!(store.exists());

        let (loaded_dataset, loaded_model) = store.load(SCREEN).unwrap().unwrap();
        assert_eq!(loaded_dataset.session_id, dataset.session_id);
        assert_eq!(loaded_dataset.points.len(), 9);
        assert_eq!(loaded_dataset.points[0].samples.len(), 5);

        let fv = linear_features(dataset.points[3].target, SCREEN);
        let a = regressor.predict(&fv).unwrap();
        let b = loaded_model.predict(&fv).unwrap();
        assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
    }

    #[test]
    fn test_screen_mismatch_on_load() {
        let tmp = TempDir::new().unwrap();
        let store = CalibrationStore::new(tmp.path());
        let (dataset, regressor) = calibrated();
        store.save(&dataset, &regressor).unwrap();

        let err = store.load(ScreenGeometry::new(2560, 1440)).unwrap_err();
        assert!(matches!(err, GazeError::ScreenMismatch { .. }));
    }

    #[test]
    fn test_corrupt_model_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = CalibrationStore::new(tmp.path());
        let (dataset, regressor) = calibrated();
        store.save(&dataset, &regressor).unwrap();

        std::fs::write(store.model_path(), "{\"schemaVersion\": 1}").unwrap();
        assert!(store.load(SCREEN).is_err());
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = CalibrationStore::new(tmp.path());
        let (dataset, regressor) = calibrated();
        store.save(&dataset, &regressor).unwrap();
        store.save(&dataset, &regressor).unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
    }
}
