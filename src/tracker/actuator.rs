//! Cursor actuation
//!
//! OS-level cursor injection lives outside this crate. The tracking loop only
//! needs something that accepts a target position and a click.

use crate::error::{GazeError, GazeResult};
use crate::processing::MouseButton;
use crate::screen::ScreenPoint;
use parking_lot::Mutex as ParkingMutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Receiver of cursor moves and clicks
pub trait Actuator: Send {
    fn move_cursor_to(&mut self, point: ScreenPoint) -> GazeResult<()>;
    fn click(&mut self, button: MouseButton) -> GazeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub x: f64,
    pub y: f64,
    pub process_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorClick {
    pub x: f64,
    pub y: f64,
    pub button: MouseButton,
    pub process_time_ms: f64,
}

/// Everything a [`RecordingActuator`] saw, as written to disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationLog {
    pub moves: Vec<CursorMove>,
    pub clicks: Vec<CursorClick>,
}

/// Actuator that records every action into shared buffers
///
/// Clones share the buffers, so a clone kept by the caller can inspect what
/// the tracking loop did with the boxed original.
#[derive(Debug, Clone)]
pub struct RecordingActuator {
    start: Instant,
    position: Arc<ParkingMutex<Option<ScreenPoint>>>,
    moves: Arc<ParkingMutex<Vec<CursorMove>>>,
    clicks: Arc<ParkingMutex<Vec<CursorClick>>>,
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            position: Arc::new(ParkingMutex::new(None)),
            moves: Arc::new(ParkingMutex::new(Vec::new())),
            clicks: Arc::new(ParkingMutex::new(Vec::new())),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn moves(&self) -> Vec<CursorMove> {
        self.moves.lock().clone()
    }

    pub fn clicks(&self) -> Vec<CursorClick> {
        self.clicks.lock().clone()
    }

    pub fn log(&self) -> ActuationLog {
        ActuationLog {
            moves: self.moves(),
            clicks: self.clicks(),
        }
    }

    /// Write the recorded actions as pretty JSON
    pub fn write_json(&self, path: &Path) -> GazeResult<()> {
        let data = serde_json::to_vec_pretty(&self.log())
            .map_err(|e| GazeError::Persistence(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl Actuator for RecordingActuator {
    fn move_cursor_to(&mut self, point: ScreenPoint) -> GazeResult<()> {
        if !point.is_finite() {
            return Err(GazeError::Actuator(format!(
                "refusing non-finite cursor target ({}, {})",
                point.x, point.y
            )));
        }
        *self.position.lock() = Some(point);
        let process_time_ms = self.elapsed_ms();
        self.moves.lock().push(CursorMove {
            x: point.x,
            y: point.y,
            process_time_ms,
        });
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> GazeResult<()> {
        let position = self.position.lock().unwrap_or(ScreenPoint::new(0.0, 0.0));
        let process_time_ms = self.elapsed_ms();
        self.clicks.lock().push(CursorClick {
            x: position.x,
            y: position.y,
            button,
            process_time_ms,
        });
        Ok(())
    }
}

/// Actuator that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullActuator;

impl Actuator for NullActuator {
    fn move_cursor_to(&mut self, _point: ScreenPoint) -> GazeResult<()> {
        Ok(())
    }

    fn click(&mut self, _button: MouseButton) -> GazeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_recordings() {
        let observer = RecordingActuator::new();
        let mut boxed: Box<dyn Actuator> = Box::new(observer.clone());

        boxed.move_cursor_to(ScreenPoint::new(10.0, 20.0)).unwrap();
        boxed.click(MouseButton::Left).unwrap();

        let moves = observer.moves();
        assert_eq!(moves.len(), 1);
        assert_eq!((moves[0].x, moves[0].y), (10.0, 20.0));
        let clicks = observer.clicks();
        assert_eq!(clicks.len(), 1);
        assert_eq!((clicks[0].x, clicks[0].y), (10.0, 20.0));
    }

    #[test]
    fn test_non_finite_move_is_rejected() {
        let mut actuator = RecordingActuator::new();
        assert!(actuator.move_cursor_to(ScreenPoint::new(f64::NAN, 0.0)).is_err());
        assert!(actuator.moves().is_empty());
    }

    #[test]
    fn test_write_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("actions.json");
        let mut actuator = RecordingActuator::new();
        actuator.move_cursor_to(ScreenPoint::new(1.0, 2.0)).unwrap();
        actuator.write_json(&path).unwrap();

        let log: ActuationLog =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(log.moves.len(), 1);
        assert!(log.clicks.is_empty());
    }
}
