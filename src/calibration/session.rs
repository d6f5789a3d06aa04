//! Calibration sample collection and fitting
//!
//! A [`CalibrationSession`] walks through its targets strictly in order,
//! gathering `frames_per_point` feature vectors per target. Finalizing
//! aggregates each point, fits a [`GazeRegressor`] with role weights and
//! reports the in-sample error.

use crate::calibration::grid::{define_grid, CalibrationRole, CalibrationTarget};
use crate::calibration::regressor::{FitReport, GazeRegressor, TrainingSample};
use crate::capture::features::{FeatureVector, FEATURE_SCHEMA_VERSION};
use crate::config::CalibrationConfig;
use crate::error::{GazeError, GazeResult};
use crate::screen::{ScreenGeometry, ScreenPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points needed before the configured polynomial degree is used uncapped
const FULL_DEGREE_MIN_POINTS: usize = 21;
const CAPPED_DEGREE: usize = 2;

/// A completed calibration target with its aggregated features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationPoint {
    pub index: usize,
    pub target: ScreenPoint,
    pub role: CalibrationRole,
    pub sample_count: usize,
    pub mean: FeatureVector,
    pub std_dev: FeatureVector,
    /// Raw samples, kept only when `retain_raw_samples` is set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<FeatureVector>,
}

impl CalibrationPoint {
    pub fn aggregate(
        target: &CalibrationTarget,
        samples: Vec<FeatureVector>,
        retain_samples: bool,
    ) -> GazeResult<Self> {
        let (Some(mean), Some(std_dev)) =
            (FeatureVector::mean(&samples), FeatureVector::std_dev(&samples))
        else {
            return Err(GazeError::CalibrationFit(format!(
                "calibration point {} has no samples",
                target.index
            )));
        };
        Ok(Self {
            index: target.index,
            target: target.position,
            role: target.role,
            sample_count: samples.len(),
            mean,
            std_dev,
            samples: if retain_samples { samples } else { Vec::new() },
        })
    }
}

/// Everything collected by one calibration, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationDataset {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub screen: ScreenGeometry,
    pub sampling_rate_hz: f64,
    pub points: Vec<CalibrationPoint>,
    #[serde(default)]
    pub training_error: Option<FitReport>,
}

impl CalibrationDataset {
    pub fn new(screen: ScreenGeometry, sampling_rate_hz: f64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            schema_version: FEATURE_SCHEMA_VERSION,
            screen,
            sampling_rate_hz,
            points: Vec::new(),
            training_error: None,
        }
    }

    /// Check the feature schema and per-point sanity of a loaded dataset
    pub fn validate(&self) -> GazeResult<()> {
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(GazeError::schema(
                format!("feature schema {}", FEATURE_SCHEMA_VERSION),
                format!("feature schema {}", self.schema_version),
            ));
        }
        for point in &self.points {
            if point.sample_count == 0 || !point.mean.is_finite() || !point.target.is_finite() {
                return Err(GazeError::Persistence(format!(
                    "calibration point {} is invalid",
                    point.index
                )));
            }
        }
        Ok(())
    }

    /// Insert `point`, replacing any existing point at the same target
    pub fn merge_point(&mut self, mut point: CalibrationPoint) {
        match self
            .points
            .iter()
            .position(|p| p.target.distance(point.target) < 0.5)
        {
            Some(existing) => {
                point.index = self.points[existing].index;
                tracing::debug!("Replacing calibration point {}", point.index);
                self.points[existing] = point;
            }
            None => {
                point.index = self.points.len();
                tracing::debug!("Adding calibration point {}", point.index);
                self.points.push(point);
            }
        }
    }

    /// Fit a regressor on the aggregated points with role weights
    pub fn fit(&self, config: &CalibrationConfig) -> GazeResult<(GazeRegressor, FitReport)> {
        let n = self.points.len();
        if n < config.min_points {
            return Err(GazeError::CalibrationFit(format!(
                "need at least {} calibration points, got {}",
                config.min_points, n
            )));
        }
        for role in [
            CalibrationRole::Corner,
            CalibrationRole::Edge,
            CalibrationRole::Center,
        ] {
            if !self.points.iter().any(|p| p.role == role) {
                return Err(GazeError::CalibrationFit(format!(
                    "no {} calibration points",
                    role
                )));
            }
        }

        let mut degree = config.polynomial_degree;
        if n < FULL_DEGREE_MIN_POINTS && degree > CAPPED_DEGREE {
            tracing::warn!(
                "Only {} calibration points; capping polynomial degree at {}",
                n,
                CAPPED_DEGREE
            );
            degree = CAPPED_DEGREE;
        }

        let samples: Vec<TrainingSample> = self
            .points
            .iter()
            .map(|p| TrainingSample {
                features: p.mean,
                target: p.target,
                weight: role_weight(p.role, config),
            })
            .collect();
        let regressor = GazeRegressor::fit(&samples, degree, config.ridge_alpha)?;
        let report = FitReport::evaluate(
            &regressor,
            self.points.iter().map(|p| (p.index, &p.mean, p.target)),
            config.good_error_px,
            config.marginal_error_px,
        )?;

        tracing::info!(
            "Calibration fit: {} points, degree {}, mean error x={:.1}px y={:.1}px ({})",
            n,
            degree,
            report.mean_abs_error_x,
            report.mean_abs_error_y,
            report.quality
        );
        Ok((regressor, report))
    }
}

pub fn role_weight(role: CalibrationRole, config: &CalibrationConfig) -> f64 {
    match role {
        CalibrationRole::Center => config.center_weight,
        CalibrationRole::Edge => config.edge_weight,
        CalibrationRole::Corner => config.corner_weight,
    }
}

/// Collection progress after one accepted sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointProgress {
    pub point_index: usize,
    pub collected: usize,
    pub required: usize,
    pub point_complete: bool,
    pub session_complete: bool,
}

/// Result of a successful calibration
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub regressor: GazeRegressor,
    pub dataset: CalibrationDataset,
    pub report: FitReport,
}

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: CalibrationConfig,
    screen: ScreenGeometry,
    targets: Vec<CalibrationTarget>,
    current: usize,
    current_samples: Vec<FeatureVector>,
    missed_frames: u32,
    retries: u32,
    completed: Vec<CalibrationPoint>,
    aborted: bool,
}

impl CalibrationSession {
    /// Create an empty session; call [`define_grid`](Self::define_grid) next
    pub fn new(config: CalibrationConfig, screen: ScreenGeometry) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            screen,
            targets: Vec::new(),
            current: 0,
            current_samples: Vec::new(),
            missed_frames: 0,
            retries: 0,
            completed: Vec::new(),
            aborted: false,
        }
    }

    /// Session collecting a single target, for incremental recalibration
    pub fn single_point(config: CalibrationConfig, screen: ScreenGeometry, target: ScreenPoint) -> Self {
        let mut session = Self::new(config, screen);
        session.targets = vec![CalibrationTarget::at(0, target, screen)];
        session
    }

    /// Lay out `n_points` targets and restart collection
    pub fn define_grid(&mut self, n_points: usize) -> GazeResult<&[CalibrationTarget]> {
        self.targets = define_grid(n_points, self.screen)?;
        self.current = 0;
        self.current_samples.clear();
        self.missed_frames = 0;
        self.retries = 0;
        self.completed.clear();
        self.aborted = false;
        tracing::info!(
            "Calibration {} started with {} points on {}",
            self.id,
            n_points,
            self.screen
        );
        Ok(&self.targets)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn screen(&self) -> ScreenGeometry {
        self.screen
    }

    pub fn targets(&self) -> &[CalibrationTarget] {
        &self.targets
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_target(&self) -> Option<&CalibrationTarget> {
        if self.aborted {
            return None;
        }
        self.targets.get(self.current)
    }

    /// Samples gathered so far for the current point
    pub fn collected_samples(&self) -> usize {
        self.current_samples.len()
    }

    pub fn completed_points(&self) -> &[CalibrationPoint] {
        &self.completed
    }

    pub fn is_complete(&self) -> bool {
        !self.targets.is_empty() && self.current >= self.targets.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Append a sample to the current point
    pub fn collect_sample(
        &mut self,
        point_index: usize,
        features: FeatureVector,
    ) -> GazeResult<PointProgress> {
        self.ensure_collecting()?;
        if point_index != self.current {
            return Err(GazeError::InvalidPointIndex {
                expected: self.current,
                got: point_index,
            });
        }
        if !features.is_finite() {
            return Err(GazeError::FeatureExtraction(
                "non-finite calibration sample".to_string(),
            ));
        }

        self.current_samples.push(features);
        let required = self.config.frames_per_point;
        let collected = self.current_samples.len();
        let point_complete = collected >= required;

        if point_complete {
            let target = self.targets[self.current];
            let samples = std::mem::take(&mut self.current_samples);
            let point = CalibrationPoint::aggregate(&target, samples, self.config.retain_raw_samples)?;
            tracing::debug!(
                "Calibration point {} ({}) complete at ({:.0}, {:.0})",
                target.index,
                target.role,
                target.position.x,
                target.position.y
            );
            self.completed.push(point);
            self.current += 1;
            self.missed_frames = 0;
            self.retries = 0;
        }

        Ok(PointProgress {
            point_index,
            collected,
            required,
            point_complete,
            session_complete: self.is_complete(),
        })
    }

    /// Count a frame without usable features during the current point
    pub fn record_missed_frame(&mut self) -> GazeResult<()> {
        self.ensure_collecting()?;
        self.missed_frames += 1;
        if self.missed_frames <= self.config.max_missed_frames_per_point {
            return Ok(());
        }

        self.retries += 1;
        if self.retries > self.config.max_point_retries {
            self.aborted = true;
            tracing::warn!(
                "Calibration point {} failed after {} retries; aborting",
                self.current,
                self.config.max_point_retries
            );
            return Err(GazeError::CalibrationPointTimeout {
                point_index: self.current,
                retries: self.config.max_point_retries,
            });
        }

        tracing::warn!(
            "Calibration point {} lost tracking; restarting (retry {}/{})",
            self.current,
            self.retries,
            self.config.max_point_retries
        );
        self.current_samples.clear();
        self.missed_frames = 0;
        Ok(())
    }

    pub fn abort(&mut self) {
        if !self.aborted {
            tracing::info!("Calibration {} aborted", self.id);
        }
        self.aborted = true;
    }

    /// Aggregate all points and fit a fresh regressor
    pub fn finalize(&self) -> GazeResult<CalibrationOutcome> {
        self.ensure_finished()?;
        let mut dataset = self.dataset();
        dataset.points = self.completed.clone();
        Self::fit_outcome(dataset, &self.config)
    }

    /// Merge completed points into `base` and refit
    pub fn finalize_incremental(&self, base: CalibrationDataset) -> GazeResult<CalibrationOutcome> {
        self.ensure_finished()?;
        if base.screen != self.screen {
            return Err(GazeError::ScreenMismatch {
                expected: self.screen,
                found: base.screen,
            });
        }
        let mut dataset = base;
        for point in &self.completed {
            dataset.merge_point(point.clone());
        }
        dataset.created_at = self.created_at;
        dataset.training_error = None;
        Self::fit_outcome(dataset, &self.config)
    }

    fn fit_outcome(mut dataset: CalibrationDataset, config: &CalibrationConfig) -> GazeResult<CalibrationOutcome> {
        let (regressor, report) = dataset.fit(config)?;
        dataset.training_error = Some(report.clone());
        Ok(CalibrationOutcome {
            regressor,
            dataset,
            report,
        })
    }

    fn dataset(&self) -> CalibrationDataset {
        CalibrationDataset {
            session_id: self.id,
            created_at: self.created_at,
            schema_version: FEATURE_SCHEMA_VERSION,
            screen: self.screen,
            sampling_rate_hz: self.config.sampling_rate_hz,
            points: Vec::new(),
            training_error: None,
        }
    }

    fn ensure_collecting(&self) -> GazeResult<()> {
        if self.aborted {
            return Err(GazeError::InvalidState("calibration was aborted".to_string()));
        }
        if self.targets.is_empty() {
            return Err(GazeError::InvalidState("no calibration grid defined".to_string()));
        }
        if self.is_complete() {
            return Err(GazeError::InvalidState(
                "all calibration points are collected".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_finished(&self) -> GazeResult<()> {
        if self.aborted {
            return Err(GazeError::InvalidState("calibration was aborted".to_string()));
        }
        if !self.is_complete() {
            return Err(GazeError::InvalidState(format!(
                "calibration incomplete ({}/{} points)",
                self.completed.len(),
                self.targets.len()
            )));
        }
        Ok(())
    }
}

/// Synthetic gaze for tests: eye ratios move linearly with the target
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn linear_features(target: ScreenPoint, screen: ScreenGeometry) -> FeatureVector {
        let u = 0.2 + 0.6 * target.x / screen.width as f64;
        let v = 0.25 + 0.5 * target.y / screen.height as f64;
        FeatureVector::from_parts((u, v), (u + 0.01, v), (0.5, 0.52))
    }

    /// Zero-mean jitter for the `k`-th of five samples
    pub fn jitter(k: usize) -> f64 {
        [0.0, 0.002, -0.002, 0.001, -0.001][k % 5]
    }

    pub fn jittered(fv: FeatureVector, k: usize) -> FeatureVector {
        let d = jitter(k);
        FeatureVector::from_parts(
            (fv.left_x + d, fv.left_y - d),
            (fv.right_x + d, fv.right_y - d),
            (fv.head_x, fv.head_y),
        )
    }

    pub fn config() -> CalibrationConfig {
        CalibrationConfig {
            frames_per_point: 5,
            max_missed_frames_per_point: 3,
            ..Default::default()
        }
    }

    /// Run every point of `session` to completion
    pub fn collect_all(session: &mut CalibrationSession) {
        let screen = session.screen();
        while let Some(target) = session.current_target().copied() {
            let base = linear_features(target.position, screen);
            for k in 0..5 {
                session.collect_sample(target.index, jittered(base, k)).unwrap();
            }
        }
    }
}
