//! Landmark records delivered by the face/iris detector
//!
//! Coordinates are normalized to `[0, 1]` of the camera frame. The
//! [`LandmarkLayout`] names which indices hold the eye contours, the iris
//! points and the head reference; defaults follow the MediaPipe refined face
//! mesh (478 points).

use serde::{Deserialize, Serialize};

/// A single normalized landmark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// All landmarks detected for one face
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
}

/// One frame from the landmark source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkFrame {
    /// Monotonic frame counter assigned by the source
    pub seq: u64,
    /// Capture time in milliseconds (process time)
    pub timestamp_ms: f64,
    /// Camera frame width in pixels
    pub frame_width: u32,
    /// Camera frame height in pixels
    pub frame_height: u32,
    /// `None` when the detector found no face
    #[serde(default)]
    pub face: Option<FaceLandmarks>,
}

impl LandmarkFrame {
    pub fn new(seq: u64, timestamp_ms: f64, frame_width: u32, frame_height: u32) -> Self {
        Self {
            seq,
            timestamp_ms,
            frame_width,
            frame_height,
            face: None,
        }
    }

    pub fn with_face(mut self, face: FaceLandmarks) -> Self {
        self.face = Some(face);
        self
    }
}

/// Six-point eye contour plus iris points for one eye
///
/// Contour order: outer corner, upper lid (two points), inner corner, lower
/// lid (two points, mirrored), i.e. `p1`/`p5` and `p2`/`p4` are vertical pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeLayout {
    pub contour: [usize; 6],
    pub iris: Vec<usize>,
}

/// Landmark indices used by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkLayout {
    pub left_eye: EyeLayout,
    pub right_eye: EyeLayout,
    pub head_reference: usize,
}

impl Default for LandmarkLayout {
    fn default() -> Self {
        Self {
            left_eye: EyeLayout {
                contour: [362, 385, 387, 263, 373, 380],
                iris: vec![474, 475, 476, 477],
            },
            right_eye: EyeLayout {
                contour: [33, 160, 158, 133, 153, 144],
                iris: vec![469, 470, 471, 472],
            },
            // Nose tip
            head_reference: 1,
        }
    }
}

impl LandmarkLayout {
    /// Number of points a face record must contain for this layout
    pub fn required_points(&self) -> usize {
        self.left_eye
            .contour
            .iter()
            .chain(self.right_eye.contour.iter())
            .chain(self.left_eye.iris.iter())
            .chain(self.right_eye.iris.iter())
            .copied()
            .chain(std::iter::once(self.head_reference))
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
    }
}
