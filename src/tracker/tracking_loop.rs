//! The per-frame tracking state machine
//!
//! A [`TrackingLoop`] is either tracking (features → regressor → smoothing →
//! actuator, plus wink clicks) or calibrating (features feed the active
//! [`CalibrationSession`] only). Per-frame failures never stop the loop; the
//! cursor simply holds its last position.

use crate::calibration::{
    CalibrationDataset, CalibrationQuality, CalibrationSession, CalibrationStore,
    CalibrationTarget, GazeRegressor,
};
use crate::capture::{FeatureExtractor, FeatureVector, LandmarkFrame};
use crate::config::{GazeConfig, TrackingConfig};
use crate::error::{GazeError, GazeResult};
use crate::processing::{BlinkDetector, ClickEvent, SmoothingPipeline, SmoothingState};
use crate::screen::{ScreenGeometry, ScreenPoint};
use crate::tracker::actuator::Actuator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Tracking,
    Calibrating,
}

/// Progress of the active calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationStatus {
    pub point_index: usize,
    pub total_points: usize,
    pub target: ScreenPoint,
    pub collected: usize,
    pub required: usize,
    pub incremental: bool,
}

/// How a calibration ended, reported on the frame that ended it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CalibrationResult {
    Completed {
        points: usize,
        mean_abs_error_x: f64,
        mean_abs_error_y: f64,
        quality: CalibrationQuality,
    },
    Failed {
        reason: String,
    },
}

/// Per-frame diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReport {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub mode: TrackingMode,
    pub face_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    /// Regressor output before smoothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<ScreenPoint>,
    /// Final cursor position (held when this frame produced none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<ScreenPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click: Option<ClickEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_result: Option<CalibrationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameReport {
    fn new(frame: &LandmarkFrame, mode: TrackingMode) -> Self {
        Self {
            seq: frame.seq,
            timestamp_ms: frame.timestamp_ms,
            mode,
            face_detected: frame.face.is_some(),
            features: None,
            raw: None,
            position: None,
            click: None,
            calibration: None,
            calibration_result: None,
            error: None,
        }
    }
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStats {
    pub frames: u64,
    pub frames_without_face: u64,
    pub extraction_errors: u64,
    pub predictions: u64,
    pub clicks: u64,
    pub actuator_errors: u64,
    pub dropped_frames: u64,
    pub calibrations_completed: u64,
    pub calibrations_failed: u64,
}

/// State saved when a calibration starts, restored if it fails or is aborted
struct CalibrationRun {
    session: CalibrationSession,
    incremental: bool,
    prior_regressor: Option<GazeRegressor>,
    prior_smoothing: SmoothingState,
}

enum Mode {
    Tracking,
    Calibrating(Box<CalibrationRun>),
}

pub struct TrackingLoop {
    config: GazeConfig,
    tracking: TrackingConfig,
    extractor: FeatureExtractor,
    regressor: Option<GazeRegressor>,
    dataset: Option<CalibrationDataset>,
    smoothing: SmoothingPipeline,
    blink: BlinkDetector,
    actuator: Box<dyn Actuator>,
    store: Option<CalibrationStore>,
    mode: Mode,
    stats: TrackingStats,
    last_position: Option<ScreenPoint>,
    last_click: Option<ClickEvent>,
}

impl TrackingLoop {
    pub fn new(config: GazeConfig, actuator: Box<dyn Actuator>) -> Self {
        let tracking = config.tracking.clone();
        let mut smoothing = SmoothingPipeline::new(config.smoothing.clone());
        smoothing.set_gain(tracking.gain);
        Self {
            extractor: FeatureExtractor::new(config.landmarks.clone()),
            blink: BlinkDetector::new(config.blink.clone(), config.landmarks.clone()),
            smoothing,
            tracking,
            regressor: None,
            dataset: None,
            actuator,
            store: None,
            mode: Mode::Tracking,
            stats: TrackingStats::default(),
            last_position: None,
            last_click: None,
            config,
        }
    }

    /// Persist future calibrations to `store`
    pub fn with_store(mut self, store: CalibrationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Load the stored calibration, if any
    ///
    /// Any load failure leaves the loop uncalibrated and returns `false`.
    pub fn load_calibration(&mut self) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.load(self.config.screen) {
            Ok(Some((dataset, regressor))) => {
                self.install_calibration(regressor, dataset);
                true
            }
            Ok(None) => {
                tracing::info!("No stored calibration in {}", store.dir().display());
                false
            }
            Err(e) => {
                tracing::warn!("Ignoring stored calibration: {}", e);
                false
            }
        }
    }

    /// Replace the active model and its dataset
    pub fn install_calibration(&mut self, regressor: GazeRegressor, dataset: CalibrationDataset) {
        self.regressor = Some(regressor);
        self.dataset = Some(dataset);
        self.smoothing.reset();
    }

    pub fn screen(&self) -> ScreenGeometry {
        self.config.screen
    }

    pub fn is_calibrated(&self) -> bool {
        self.regressor.is_some()
    }

    pub fn regressor(&self) -> Option<&GazeRegressor> {
        self.regressor.as_ref()
    }

    pub fn dataset(&self) -> Option<&CalibrationDataset> {
        self.dataset.as_ref()
    }

    pub fn mode(&self) -> TrackingMode {
        match self.mode {
            Mode::Tracking => TrackingMode::Tracking,
            Mode::Calibrating(_) => TrackingMode::Calibrating,
        }
    }

    pub fn tracking_config(&self) -> &TrackingConfig {
        &self.tracking
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    pub fn last_position(&self) -> Option<ScreenPoint> {
        self.last_position
    }

    pub fn last_click(&self) -> Option<ClickEvent> {
        self.last_click
    }

    pub fn record_dropped_frames(&mut self, count: u64) {
        self.stats.dropped_frames += count;
    }

    /// Targets of the active calibration, empty while tracking
    pub fn calibration_targets(&self) -> &[CalibrationTarget] {
        match &self.mode {
            Mode::Calibrating(run) => run.session.targets(),
            Mode::Tracking => &[],
        }
    }

    pub fn calibration_status(&self) -> Option<CalibrationStatus> {
        let Mode::Calibrating(run) = &self.mode else {
            return None;
        };
        let session = &run.session;
        let target = session.current_target()?;
        Some(CalibrationStatus {
            point_index: target.index,
            total_points: session.targets().len(),
            target: target.position,
            collected: session.collected_samples(),
            required: self.config.calibration.frames_per_point,
            incremental: run.incremental,
        })
    }

    pub fn set_actuation(&mut self, enabled: bool) {
        if self.tracking.actuation_enabled != enabled {
            tracing::info!(
                "Cursor control {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.tracking.actuation_enabled = enabled;
    }

    pub fn toggle_actuation(&mut self) -> bool {
        self.set_actuation(!self.tracking.actuation_enabled);
        self.tracking.actuation_enabled
    }

    pub fn set_gain(&mut self, gain: f64) -> f64 {
        let gain = self.tracking.set_gain(gain);
        self.smoothing.set_gain(gain);
        tracing::info!("Output gain {:.2}", gain);
        gain
    }

    pub fn adjust_gain(&mut self, steps: i32) -> f64 {
        let gain = self.tracking.adjust_gain(steps);
        self.smoothing.set_gain(gain);
        tracing::info!("Output gain {:.2}", gain);
        gain
    }

    pub fn toggle_smoothing(&mut self) -> bool {
        self.tracking.smoothing_enabled = !self.tracking.smoothing_enabled;
        tracing::info!(
            "Smoothing {}",
            if self.tracking.smoothing_enabled { "enabled" } else { "disabled" }
        );
        self.tracking.smoothing_enabled
    }

    pub fn reset_smoothing(&mut self) {
        self.smoothing.reset();
    }

    /// Start a full calibration with `n_points` targets
    pub fn begin_recalibration(&mut self, n_points: usize) -> GazeResult<&[CalibrationTarget]> {
        let mut session = CalibrationSession::new(self.config.calibration.clone(), self.config.screen);
        session.define_grid(n_points)?;
        self.enter_calibration(session, false);
        Ok(self.calibration_targets())
    }

    /// Recollect a single target and refit with the existing dataset
    pub fn begin_point_recalibration(&mut self, target: ScreenPoint) -> GazeResult<()> {
        if self.dataset.is_none() {
            return Err(GazeError::InvalidState(
                "point recalibration needs an existing calibration".to_string(),
            ));
        }
        if !target.is_finite() {
            return Err(GazeError::InvalidState("invalid recalibration target".to_string()));
        }
        let target = self.config.screen.clamp(target);
        let session =
            CalibrationSession::single_point(self.config.calibration.clone(), self.config.screen, target);
        tracing::info!(
            "Recalibrating point at ({:.0}, {:.0})",
            target.x,
            target.y
        );
        self.enter_calibration(session, true);
        Ok(())
    }

    fn enter_calibration(&mut self, session: CalibrationSession, incremental: bool) {
        if let Mode::Calibrating(previous) = std::mem::replace(&mut self.mode, Mode::Tracking) {
            // Restarting mid-calibration keeps the state from before the first one
            self.regressor = previous.prior_regressor;
            self.smoothing.restore(previous.prior_smoothing);
        }
        let run = CalibrationRun {
            session,
            incremental,
            prior_regressor: self.regressor.clone(),
            prior_smoothing: self.smoothing.state().clone(),
        };
        self.mode = Mode::Calibrating(Box::new(run));
    }

    /// Abandon the active calibration and restore the previous model
    pub fn abort_calibration(&mut self) -> bool {
        match std::mem::replace(&mut self.mode, Mode::Tracking) {
            Mode::Calibrating(mut run) => {
                run.session.abort();
                self.revert(*run);
                true
            }
            Mode::Tracking => false,
        }
    }

    fn revert(&mut self, run: CalibrationRun) {
        self.regressor = run.prior_regressor;
        self.smoothing.restore(run.prior_smoothing);
    }

    /// Write the active calibration to the configured store
    pub fn persist(&self) -> GazeResult<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| GazeError::InvalidState("no calibration store configured".to_string()))?;
        match (&self.dataset, &self.regressor) {
            (Some(dataset), Some(regressor)) => store.save(dataset, regressor),
            _ => Err(GazeError::InvalidState("not calibrated".to_string())),
        }
    }

    /// Save the active calibration on the way out
    ///
    /// Does nothing without a store or a calibration. Returns whether a save
    /// went through; failures are logged, not returned.
    pub fn persist_on_exit(&self) -> bool {
        if self.store.is_none() || !self.is_calibrated() {
            return false;
        }
        match self.persist() {
            Ok(()) => {
                tracing::info!("Calibration saved on exit");
                true
            }
            Err(e) => {
                tracing::error!("Failed to save calibration on exit: {}", e);
                false
            }
        }
    }

    /// Run one landmark frame through the pipeline
    pub fn process_frame(&mut self, frame: &LandmarkFrame) -> FrameReport {
        self.stats.frames += 1;
        let mut report = FrameReport::new(frame, self.mode());

        let features = match self.extractor.extract(frame) {
            Ok(Some(features)) => Some(features),
            Ok(None) => {
                self.stats.frames_without_face += 1;
                None
            }
            Err(e) => {
                self.stats.extraction_errors += 1;
                tracing::debug!("Frame {} skipped: {}", frame.seq, e);
                report.error = Some(e.to_string());
                None
            }
        };
        report.features = features;

        match self.mode {
            Mode::Calibrating(_) => self.calibration_frame(features, &mut report),
            Mode::Tracking => self.tracking_frame(frame, features, &mut report),
        }
        report.position = self.last_position;
        report
    }

    fn calibration_frame(&mut self, features: Option<FeatureVector>, report: &mut FrameReport) {
        let Mode::Calibrating(run) = &mut self.mode else {
            return;
        };
        let session = &mut run.session;

        let step = match features {
            Some(features) => session
                .collect_sample(session.current_index(), features)
                .map(|progress| progress.session_complete),
            None => session.record_missed_frame().map(|_| false),
        };
        report.calibration = self.calibration_status();

        match step {
            Ok(false) => {}
            Ok(true) => self.finish_calibration(report),
            Err(e) => self.fail_calibration(e, report),
        }
    }

    fn finish_calibration(&mut self, report: &mut FrameReport) {
        let Mode::Calibrating(run) = std::mem::replace(&mut self.mode, Mode::Tracking) else {
            return;
        };
        let result = if run.incremental {
            match self.dataset.clone() {
                Some(base) => run.session.finalize_incremental(base),
                None => Err(GazeError::InvalidState("no dataset to merge into".to_string())),
            }
        } else {
            run.session.finalize()
        };

        match result {
            Ok(outcome) => {
                self.stats.calibrations_completed += 1;
                report.calibration_result = Some(CalibrationResult::Completed {
                    points: outcome.dataset.points.len(),
                    mean_abs_error_x: outcome.report.mean_abs_error_x,
                    mean_abs_error_y: outcome.report.mean_abs_error_y,
                    quality: outcome.report.quality,
                });
                if outcome.report.quality == CalibrationQuality::Poor {
                    tracing::warn!("Calibration quality is poor; consider recalibrating");
                }
                self.install_calibration(outcome.regressor, outcome.dataset);
                if self.store.is_some() {
                    if let Err(e) = self.persist() {
                        tracing::warn!("Failed to save calibration: {}", e);
                    }
                }
            }
            Err(e) => {
                self.mode = Mode::Calibrating(run);
                self.fail_calibration(e, report);
            }
        }
    }

    fn fail_calibration(&mut self, error: GazeError, report: &mut FrameReport) {
        let Mode::Calibrating(run) = std::mem::replace(&mut self.mode, Mode::Tracking) else {
            return;
        };
        tracing::warn!("Calibration failed: {}", error);
        self.stats.calibrations_failed += 1;
        self.revert(*run);
        report.calibration_result = Some(CalibrationResult::Failed {
            reason: error.to_string(),
        });
    }

    fn tracking_frame(
        &mut self,
        frame: &LandmarkFrame,
        features: Option<FeatureVector>,
        report: &mut FrameReport,
    ) {
        let Some(features) = features else {
            return;
        };

        let raw = match self.regressor.as_ref().map(|r| r.predict(&features)) {
            Some(Ok(raw)) => Some(raw),
            Some(Err(e)) => {
                report.error = Some(e.to_string());
                None
            }
            None => None,
        };
        report.raw = raw;

        let gaze_y = match raw {
            Some(raw) => self.config.screen.normalized_y(raw.y),
            None => features.avg_y,
        };
        let click = self.blink.update(frame, gaze_y);

        if let Some(raw) = raw {
            self.stats.predictions += 1;
            let center = self.config.screen.center();
            let smoothed = if self.tracking.smoothing_enabled {
                self.smoothing.step(raw, center)
            } else {
                self.smoothing.passthrough(raw, center)
            };
            let position = self.config.screen.clamp(smoothed);
            self.last_position = Some(position);
            if self.tracking.actuation_enabled {
                if let Err(e) = self.actuator.move_cursor_to(position) {
                    self.stats.actuator_errors += 1;
                    tracing::warn!("Cursor move failed: {}", e);
                }
            }
        }

        if let Some(click) = click {
            report.click = Some(click);
            self.last_click = Some(click);
            self.stats.clicks += 1;
            if self.tracking.actuation_enabled {
                if let Err(e) = self.actuator.click(click.button) {
                    self.stats.actuator_errors += 1;
                    tracing::warn!("Click failed: {}", e);
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::capture::landmarks::fixtures as landmarks;
    use crate::capture::landmarks::fixtures::EyeSpec;
    use crate::tracker::actuator::RecordingActuator;

    fn tracker() -> (TrackingLoop, RecordingActuator) {
        let actuator = RecordingActuator::new();
        (TrackingLoop::new(config(), Box::new(actuator.clone())), actuator)
    }

    fn calibrated() -> (TrackingLoop, RecordingActuator, u64) {
        let (mut tracker, actuator) = tracker();
        tracker.begin_recalibration(9).unwrap();
        let mut seq = 0;
        run_calibration(&mut tracker, &mut seq);
        assert!(tracker.is_calibrated());
        (tracker, actuator, seq)
    }

    #[test]
    fn test_uncalibrated_loop_reports_features_only() {
        let (mut tracker, actuator) = tracker();
        let report = tracker.process_frame(&landmarks::open_frame(0, 0.0, (0.5, 0.5)));
        assert!(report.face_detected);
        assert!(report.features.is_some());
        assert!(report.raw.is_none());
        assert!(report.position.is_none());
        assert!(actuator.moves().is_empty());
    }

    #[test]
    fn test_calibration_then_tracking() {
        let (mut tracker, actuator, mut seq) = calibrated();
        let screen = tracker.screen();
        assert_eq!(tracker.mode(), TrackingMode::Tracking);
        assert_eq!(tracker.stats().calibrations_completed, 1);

        let target = ScreenPoint::new(700.0, 400.0);
        let report = tracker.process_frame(&looking_at(seq, target, screen));
        seq += 1;
        let position = report.position.unwrap();
        assert!(position.distance(target) < 5.0, "got {:?}", position);
        assert_eq!(actuator.moves().len(), 1);

        // Moving gaze to another target converges there
        let next = ScreenPoint::new(1500.0, 900.0);
        let mut last = position;
        for _ in 0..30 {
            last = tracker.process_frame(&looking_at(seq, next, screen)).position.unwrap();
            seq += 1;
        }
        assert!(last.distance(next) < 5.0, "got {:?}", last);
    }

    #[test]
    fn test_calibration_reports_progress_and_result() {
        let (mut tracker, _) = tracker();
        let targets = tracker.begin_recalibration(9).unwrap().to_vec();
        assert_eq!(targets.len(), 9);
        assert_eq!(tracker.mode(), TrackingMode::Calibrating);

        let mut seq = 0;
        let reports = run_calibration(&mut tracker, &mut seq);
        assert_eq!(reports.len(), 45);
        assert!(reports[0].calibration.is_some());
        assert!(reports.iter().all(|r| r.mode == TrackingMode::Calibrating));
        match reports.last().and_then(|r| r.calibration_result.clone()) {
            Some(CalibrationResult::Completed { points, quality, .. }) => {
                assert_eq!(points, 9);
                assert_eq!(quality, CalibrationQuality::Good);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frame_holds_cursor() {
        let (mut tracker, actuator, seq) = calibrated();
        let screen = tracker.screen();
        let good = tracker
            .process_frame(&looking_at(seq, ScreenPoint::new(900.0, 500.0), screen))
            .position
            .unwrap();
        let moves_before = actuator.moves().len();

        let mut face = landmarks::face(EyeSpec::open(0.9, 0.9), EyeSpec::open(0.9, 0.9), (0.5, 0.5));
        face.points.truncate(50);
        let report = tracker.process_frame(&landmarks::frame(seq + 1, 0.0, Some(face)));
        assert!(report.error.is_some());
        assert_eq!(report.position, Some(good));

        let report = tracker.process_frame(&landmarks::frame(seq + 2, 0.0, None));
        assert!(!report.face_detected);
        assert_eq!(report.position, Some(good));

        assert_eq!(actuator.moves().len(), moves_before);
        assert_eq!(tracker.stats().extraction_errors, 1);
        assert_eq!(tracker.stats().frames_without_face, 1);
    }

    #[test]
    fn test_position_is_clamped_to_screen() {
        let (mut tracker, _, seq) = calibrated();
        tracker.set_gain(2.0);
        let screen = tracker.screen();
        let report = tracker.process_frame(&looking_at(seq, ScreenPoint::new(1900.0, 1070.0), screen));
        let p = report.position.unwrap();
        assert!(p.x <= 1919.0 && p.y <= 1079.0 && p.x >= 0.0 && p.y >= 0.0);
        assert!(report.raw.unwrap().x > 1800.0);
    }

    #[test]
    fn test_abort_restores_previous_model() {
        let (mut tracker, _, mut seq) = calibrated();
        let screen = tracker.screen();
        let probe = landmarks::open_frame(0, 0.0, (0.4, 0.6));
        let features = FeatureExtractor::default().extract(&probe).unwrap().unwrap();
        let before = tracker.regressor().unwrap().predict(&features).unwrap();

        tracker.begin_recalibration(9).unwrap();
        for _ in 0..12 {
            let target = tracker.calibration_status().unwrap().target;
            tracker.process_frame(&looking_at(seq, target, screen));
            seq += 1;
        }
        assert!(tracker.abort_calibration());
        assert_eq!(tracker.mode(), TrackingMode::Tracking);
        let after = tracker.regressor().unwrap().predict(&features).unwrap();
        assert_eq!(before, after);
        assert!(!tracker.abort_calibration());
    }

    /// Track a few frames so the smoothing filters hold some history
    fn warm_up(tracker: &mut TrackingLoop, seq: &mut u64) -> SmoothingState {
        let screen = tracker.screen();
        for target in [(600.0, 400.0), (640.0, 420.0), (700.0, 380.0), (720.0, 450.0)] {
            tracker.process_frame(&looking_at(*seq, ScreenPoint::new(target.0, target.1), screen));
            *seq += 1;
        }
        let state = tracker.smoothing.state().clone();
        assert!(!state.is_empty());
        state
    }

    fn feed_calibration_frames(tracker: &mut TrackingLoop, seq: &mut u64, count: usize) {
        let screen = tracker.screen();
        for _ in 0..count {
            let target = tracker.calibration_status().unwrap().target;
            tracker.process_frame(&looking_at(*seq, target, screen));
            *seq += 1;
        }
    }

    #[test]
    fn test_abort_restores_smoothing_state() {
        let (mut tracker, _, mut seq) = calibrated();
        let before = warm_up(&mut tracker, &mut seq);

        tracker.begin_recalibration(9).unwrap();
        feed_calibration_frames(&mut tracker, &mut seq, 7);
        tracker.reset_smoothing();
        assert!(tracker.abort_calibration());
        assert_eq!(tracker.smoothing.state(), &before);
    }

    #[test]
    fn test_restarted_calibration_restores_original_state() {
        let (mut tracker, _, mut seq) = calibrated();
        let before = warm_up(&mut tracker, &mut seq);
        let regressor = tracker.regressor().cloned();

        tracker.begin_recalibration(9).unwrap();
        feed_calibration_frames(&mut tracker, &mut seq, 6);
        tracker.reset_smoothing();
        // Start over on the larger grid before the first run finished
        tracker.begin_recalibration(21).unwrap();
        assert_eq!(tracker.calibration_targets().len(), 21);
        feed_calibration_frames(&mut tracker, &mut seq, 6);

        assert!(tracker.abort_calibration());
        assert_eq!(tracker.smoothing.state(), &before);
        assert_eq!(tracker.regressor().cloned(), regressor);
    }

    #[test]
    fn test_failed_calibration_restores_smoothing_state() {
        let (mut tracker, _, mut seq) = calibrated();
        let before = warm_up(&mut tracker, &mut seq);

        tracker.begin_recalibration(9).unwrap();
        tracker.reset_smoothing();
        let mut result = None;
        for _ in 0..100 {
            let report = tracker.process_frame(&landmarks::frame(seq, 0.0, None));
            seq += 1;
            if report.calibration_result.is_some() {
                result = report.calibration_result;
                break;
            }
        }
        assert!(matches!(result, Some(CalibrationResult::Failed { .. })));
        assert!(tracker.is_calibrated());
        assert_eq!(tracker.smoothing.state(), &before);
    }

    #[test]
    fn test_lost_face_fails_calibration_and_reverts() {
        let (mut tracker, _) = tracker();
        tracker.begin_recalibration(9).unwrap();
        let mut result = None;
        for seq in 0..100 {
            let report = tracker.process_frame(&landmarks::frame(seq, 0.0, None));
            if report.calibration_result.is_some() {
                result = report.calibration_result;
                break;
            }
        }
        assert!(matches!(result, Some(CalibrationResult::Failed { .. })));
        assert_eq!(tracker.mode(), TrackingMode::Tracking);
        assert!(!tracker.is_calibrated());
        assert_eq!(tracker.stats().calibrations_failed, 1);
    }

    #[test]
    fn test_point_recalibration_requires_calibration() {
        let (mut tracker, _) = tracker();
        let err = tracker
            .begin_point_recalibration(ScreenPoint::new(100.0, 100.0))
            .unwrap_err();
        assert!(matches!(err, GazeError::InvalidState(_)));
    }

    #[test]
    fn test_point_recalibration_keeps_point_count() {
        let (mut tracker, _, mut seq) = calibrated();
        tracker
            .begin_point_recalibration(ScreenPoint::new(960.0, 540.0))
            .unwrap();
        assert_eq!(tracker.calibration_targets().len(), 1);
        let reports = run_calibration(&mut tracker, &mut seq);
        assert_eq!(reports.len(), 5);
        assert_eq!(tracker.dataset().unwrap().points.len(), 9);
        assert_eq!(tracker.stats().calibrations_completed, 2);
    }

    #[test]
    fn test_wink_clicks_only_when_actuation_enabled() {
        let (mut tracker, actuator, seq) = calibrated();
        let screen = tracker.screen();
        let (rx, ry) = gaze_ratio(ScreenPoint::new(960.0, 300.0), screen);
        let wink = |seq: u64, ts: f64| {
            landmarks::frame(
                seq,
                ts,
                Some(landmarks::face(EyeSpec::closed(rx, ry), EyeSpec::open(rx, ry), (0.5, 0.5))),
            )
        };

        tracker.set_actuation(false);
        let report = tracker.process_frame(&wink(seq, 10_000.0));
        assert!(report.click.is_some());
        assert!(actuator.clicks().is_empty());

        tracker.set_actuation(true);
        let report = tracker.process_frame(&wink(seq + 1, 11_000.0));
        assert!(report.click.is_some());
        assert_eq!(actuator.clicks().len(), 1);
        assert_eq!(tracker.stats().clicks, 2);
    }

    #[test]
    fn test_wink_at_bottom_of_screen_does_not_click() {
        let (mut tracker, actuator, seq) = calibrated();
        let screen = tracker.screen();
        let wink_at = |seq: u64, ts: f64, target: ScreenPoint| {
            let (rx, ry) = gaze_ratio(target, screen);
            landmarks::frame(
                seq,
                ts,
                Some(landmarks::face(EyeSpec::closed(rx, ry), EyeSpec::open(rx, ry), (0.5, 0.5))),
            )
        };

        let report = tracker.process_frame(&wink_at(seq, 10_000.0, ScreenPoint::new(960.0, 1000.0)));
        assert!(report.raw.unwrap().y > 0.6 * screen.height as f64);
        assert!(report.click.is_none());
        assert!(actuator.clicks().is_empty());
        assert_eq!(tracker.stats().clicks, 0);

        // Same wink higher up the screen clicks
        let report = tracker.process_frame(&wink_at(seq + 1, 11_000.0, ScreenPoint::new(960.0, 300.0)));
        assert!(report.click.is_some());
        assert_eq!(actuator.clicks().len(), 1);
    }

    #[test]
    fn test_runtime_controls() {
        let (mut tracker, _) = tracker();
        assert!((tracker.adjust_gain(3) - 1.3).abs() < 1e-9);
        assert_eq!(tracker.set_gain(10.0), 2.0);
        assert!(!tracker.toggle_smoothing());
        assert!(!tracker.toggle_actuation());
        assert!(tracker.toggle_actuation());
        assert!(tracker.persist().is_err());
        assert!(tracker.begin_recalibration(4).is_err());
        assert_eq!(tracker.mode(), TrackingMode::Tracking);
    }

    #[test]
    fn test_calibration_is_saved_and_reloaded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = CalibrationStore::new(tmp.path());
        let mut tracker =
            TrackingLoop::new(config(), Box::new(RecordingActuator::new())).with_store(store.clone());
        assert!(!tracker.load_calibration());
        tracker.begin_recalibration(9).unwrap();
        let mut seq = 0;
        run_calibration(&mut tracker, &mut seq);
        assert!(store.exists());

        let mut fresh =
            TrackingLoop::new(config(), Box::new(RecordingActuator::new())).with_store(store);
        assert!(fresh.load_calibration());
        assert!(fresh.is_calibrated());
    }
}
