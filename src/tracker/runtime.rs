//! Concurrent tracking runtime
//!
//! Two tokio tasks: acquisition pulls frames from a [`LandmarkSource`] into a
//! single-slot `watch` channel (the newest frame wins, stale ones are dropped)
//! and processing runs them through the [`TrackingLoop`], applying control
//! commands between frames. Readers poll a [`TrackingSnapshot`] or subscribe
//! to per-frame reports.

use crate::capture::{LandmarkFrame, LandmarkSource};
use crate::commands::ControlCommand;
use crate::error::{GazeError, GazeResult};
use crate::processing::ClickEvent;
use crate::screen::ScreenPoint;
use crate::tracker::tracking_loop::{
    CalibrationStatus, FrameReport, TrackingLoop, TrackingMode, TrackingStats,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Read-only view of the tracking state for UI readers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub mode: TrackingMode,
    pub calibrated: bool,
    pub actuation_enabled: bool,
    pub smoothing_enabled: bool,
    pub gain: f64,
    pub position: Option<ScreenPoint>,
    pub last_click: Option<ClickEvent>,
    pub calibration: Option<CalibrationStatus>,
    pub last_seq: Option<u64>,
    pub stats: TrackingStats,
    pub finished: bool,
}

impl TrackingSnapshot {
    pub fn capture(tracker: &TrackingLoop, last_seq: Option<u64>) -> Self {
        let tracking = tracker.tracking_config();
        Self {
            mode: tracker.mode(),
            calibrated: tracker.is_calibrated(),
            actuation_enabled: tracking.actuation_enabled,
            smoothing_enabled: tracking.smoothing_enabled,
            gain: tracking.gain,
            position: tracker.last_position(),
            last_click: tracker.last_click(),
            calibration: tracker.calibration_status(),
            last_seq,
            stats: tracker.stats().clone(),
            finished: false,
        }
    }
}

/// Contents of the frame slot shared between the two tasks
#[derive(Debug, Clone, Default)]
struct FrameSlot {
    frame: Option<LandmarkFrame>,
    /// Set once the source is exhausted; `frame` keeps the last frame
    finished: bool,
}

/// Handle to a running tracker
pub struct TrackingHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshot: Arc<RwLock<TrackingSnapshot>>,
    reports: broadcast::Sender<FrameReport>,
    acquisition: JoinHandle<()>,
    processing: JoinHandle<TrackingLoop>,
}

impl TrackingHandle {
    /// Queue a command; it is applied before the next frame
    pub fn send(&self, command: ControlCommand) -> GazeResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GazeError::InvalidState("tracker has stopped".to_string()))
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.snapshot.read().clone()
    }

    /// Per-frame reports from now on; slow receivers miss reports
    pub fn subscribe(&self) -> broadcast::Receiver<FrameReport> {
        self.reports.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.processing.is_finished()
    }

    /// Wait for the landmark stream to end and return the tracker
    pub async fn join(self) -> GazeResult<TrackingLoop> {
        let tracker = self
            .processing
            .await
            .map_err(|e| GazeError::InvalidState(format!("processing task failed: {}", e)))?;
        self.acquisition.abort();
        Ok(tracker)
    }

    /// Stop processing and return the tracker
    ///
    /// Sends `Quit`, so a running tracker saves its calibration first.
    pub async fn shutdown(self) -> GazeResult<TrackingLoop> {
        // The processing task may already be gone after end of stream
        let _ = self.commands.send(ControlCommand::Quit);
        self.join().await
    }
}

/// Start acquisition and processing tasks for `tracker` fed by `source`
pub fn spawn<S>(tracker: TrackingLoop, source: S) -> TrackingHandle
where
    S: LandmarkSource + 'static,
{
    let (frame_tx, frame_rx) = watch::channel(FrameSlot::default());
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
    let snapshot = Arc::new(RwLock::new(TrackingSnapshot::capture(&tracker, None)));

    let acquisition = tokio::spawn(acquire(source, frame_tx));
    let processing = tokio::spawn(process(
        tracker,
        frame_rx,
        command_rx,
        snapshot.clone(),
        report_tx.clone(),
    ));

    TrackingHandle {
        commands: command_tx,
        snapshot,
        reports: report_tx,
        acquisition,
        processing,
    }
}

async fn acquire<S: LandmarkSource>(mut source: S, frame_tx: watch::Sender<FrameSlot>) {
    tracing::info!("Landmark acquisition started ({})", source.name());
    loop {
        match source.next_frame().await {
            Ok(Some(frame)) => {
                frame_tx.send_modify(|slot| slot.frame = Some(frame));
            }
            Ok(None) => break,
            Err(GazeError::Source(msg)) => {
                tracing::warn!("Skipping unreadable frame: {}", msg);
            }
            Err(e) => {
                tracing::error!("Landmark source failed: {}", e);
                break;
            }
        }
        if frame_tx.is_closed() {
            return;
        }
    }
    frame_tx.send_modify(|slot| slot.finished = true);
    tracing::info!("Landmark acquisition finished ({})", source.name());
}

async fn process(
    mut tracker: TrackingLoop,
    mut frame_rx: watch::Receiver<FrameSlot>,
    mut command_rx: mpsc::UnboundedReceiver<ControlCommand>,
    snapshot: Arc<RwLock<TrackingSnapshot>>,
    reports: broadcast::Sender<FrameReport>,
) -> TrackingLoop {
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            biased;

            command = command_rx.recv() => {
                let Some(command) = command else { break };
                if let Err(e) = command.apply(&mut tracker) {
                    tracing::warn!("Command {:?} failed: {}", command, e);
                }
                if command == ControlCommand::Quit {
                    tracing::info!("Quit requested");
                    break;
                }
                publish(&snapshot, &tracker, last_seq, false);
            }

            changed = frame_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let slot = frame_rx.borrow_and_update().clone();
                if let Some(frame) = slot.frame {
                    if let Some(gap) = sequence_gap(last_seq, frame.seq) {
                        if gap > 0 {
                            tracker.record_dropped_frames(gap);
                        }
                        last_seq = Some(frame.seq);
                        let report = tracker.process_frame(&frame);
                        // No subscribers is fine
                        let _ = reports.send(report);
                        publish(&snapshot, &tracker, last_seq, false);
                    }
                }
                if slot.finished {
                    tracing::info!("Landmark stream ended");
                    break;
                }
            }
        }
    }

    publish(&snapshot, &tracker, last_seq, true);
    tracker
}

/// Frames skipped between the last processed `seq` and `next`
///
/// `None` means `next` was already processed. A sequence that goes backwards
/// (the source reopened its camera, or recordings were joined) starts a new
/// baseline with no gap.
fn sequence_gap(last: Option<u64>, next: u64) -> Option<u64> {
    match last {
        None => Some(0),
        Some(last) if next == last => None,
        Some(last) if next < last => {
            tracing::warn!("Frame sequence restarted at {} after {}", next, last);
            Some(0)
        }
        Some(last) => Some(next - last - 1),
    }
}

fn publish(
    snapshot: &RwLock<TrackingSnapshot>,
    tracker: &TrackingLoop,
    last_seq: Option<u64>,
    finished: bool,
) {
    let mut next = TrackingSnapshot::capture(tracker, last_seq);
    next.finished = finished;
    *snapshot.write() = next;
}
