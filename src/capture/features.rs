//! Per-frame feature extraction
//!
//! Converts a landmark frame into the fixed-schema [`FeatureVector`] consumed
//! by calibration and the gaze regressor, and exposes the eye-aspect-ratio
//! helper shared with blink detection.

use crate::capture::landmarks::{EyeLayout, FaceLandmarks, LandmarkFrame, LandmarkLayout};
use crate::error::{GazeError, GazeResult};
use serde::{Deserialize, Serialize};

/// Bumped whenever the field set or order of [`FeatureVector`] changes
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

const SPAN_EPSILON: f64 = 1e-6;

/// Gaze features for one frame
///
/// Field order is the schema: `to_array` and `from_slice` must agree with it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    pub right_y: f64,
    pub avg_x: f64,
    pub avg_y: f64,
    /// Right minus left, a head tilt/rotation proxy
    pub diff_x: f64,
    pub diff_y: f64,
    /// Head reference normalized by frame dimensions
    pub head_x: f64,
    pub head_y: f64,
}

impl FeatureVector {
    pub const LEN: usize = 10;

    /// Build the full vector from per-eye ratios and the head reference
    pub fn from_parts(left: (f64, f64), right: (f64, f64), head: (f64, f64)) -> Self {
        Self {
            left_x: left.0,
            left_y: left.1,
            right_x: right.0,
            right_y: right.1,
            avg_x: (left.0 + right.0) / 2.0,
            avg_y: (left.1 + right.1) / 2.0,
            diff_x: right.0 - left.0,
            diff_y: right.1 - left.1,
            head_x: head.0,
            head_y: head.1,
        }
    }

    pub fn to_array(&self) -> [f64; Self::LEN] {
        [
            self.left_x,
            self.left_y,
            self.right_x,
            self.right_y,
            self.avg_x,
            self.avg_y,
            self.diff_x,
            self.diff_y,
            self.head_x,
            self.head_y,
        ]
    }

    pub fn from_slice(values: &[f64]) -> GazeResult<Self> {
        if values.len() != Self::LEN {
            return Err(GazeError::schema(
                format!("{} features", Self::LEN),
                format!("{} features", values.len()),
            ));
        }
        Ok(Self {
            left_x: values[0],
            left_y: values[1],
            right_x: values[2],
            right_y: values[3],
            avg_x: values[4],
            avg_y: values[5],
            diff_x: values[6],
            diff_y: values[7],
            head_x: values[8],
            head_y: values[9],
        })
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Element-wise mean; `None` for an empty slice
    pub fn mean(samples: &[FeatureVector]) -> Option<FeatureVector> {
        if samples.is_empty() {
            return None;
        }
        let mut acc = [0.0; Self::LEN];
        for sample in samples {
            for (a, v) in acc.iter_mut().zip(sample.to_array()) {
                *a += v;
            }
        }
        let n = samples.len() as f64;
        acc.iter_mut().for_each(|a| *a /= n);
        Self::from_slice(&acc).ok()
    }

    /// Element-wise population standard deviation; `None` for an empty slice
    pub fn std_dev(samples: &[FeatureVector]) -> Option<FeatureVector> {
        let mean = Self::mean(samples)?.to_array();
        let mut acc = [0.0; Self::LEN];
        for sample in samples {
            for ((a, v), m) in acc.iter_mut().zip(sample.to_array()).zip(mean) {
                *a += (v - m) * (v - m);
            }
        }
        let n = samples.len() as f64;
        acc.iter_mut().for_each(|a| *a = (*a / n).sqrt());
        Self::from_slice(&acc).ok()
    }
}

/// Converts landmark frames into feature vectors
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    layout: LandmarkLayout,
}

impl FeatureExtractor {
    pub fn new(layout: LandmarkLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LandmarkLayout {
        &self.layout
    }

    /// Extract features from a frame
    ///
    /// `Ok(None)` means no face was detected. Malformed frames are
    /// `FeatureExtraction` errors and only invalidate this frame.
    pub fn extract(&self, frame: &LandmarkFrame) -> GazeResult<Option<FeatureVector>> {
        let Some(face) = frame.face.as_ref() else {
            return Ok(None);
        };
        let geometry = FrameGeometry::validate(frame, face, &self.layout)?;

        let left = iris_ratio(face, &self.layout.left_eye, geometry);
        let right = iris_ratio(face, &self.layout.right_eye, geometry);
        let head = face.points[self.layout.head_reference];

        let features = FeatureVector::from_parts(left, right, (head.x, head.y));
        if !features.is_finite() {
            return Err(GazeError::FeatureExtraction(
                "non-finite feature value".to_string(),
            ));
        }
        Ok(Some(features))
    }
}

/// Pixel dimensions of a frame whose face record has been validated
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameGeometry {
    width: f64,
    height: f64,
}

impl FrameGeometry {
    /// Check frame dimensions, point count and coordinate sanity
    pub(crate) fn validate(
        frame: &LandmarkFrame,
        face: &FaceLandmarks,
        layout: &LandmarkLayout,
    ) -> GazeResult<Self> {
        if frame.frame_width == 0 || frame.frame_height == 0 {
            return Err(GazeError::FeatureExtraction(format!(
                "invalid frame dimensions {}x{}",
                frame.frame_width, frame.frame_height
            )));
        }
        let required = layout.required_points();
        if face.points.len() < required {
            return Err(GazeError::FeatureExtraction(format!(
                "expected at least {} landmarks, got {}",
                required,
                face.points.len()
            )));
        }
        for eye in [&layout.left_eye, &layout.right_eye] {
            if eye.iris.is_empty() {
                return Err(GazeError::FeatureExtraction(
                    "eye layout has no iris points".to_string(),
                ));
            }
            let all_finite = eye
                .contour
                .iter()
                .chain(eye.iris.iter())
                .all(|&i| face.points[i].x.is_finite() && face.points[i].y.is_finite());
            if !all_finite {
                return Err(GazeError::FeatureExtraction(
                    "non-finite eye landmark".to_string(),
                ));
            }
        }
        Ok(Self {
            width: frame.frame_width as f64,
            height: frame.frame_height as f64,
        })
    }

    fn pixel(&self, face: &FaceLandmarks, index: usize) -> (f64, f64) {
        let p = face.points[index];
        (p.x * self.width, p.y * self.height)
    }
}

/// Iris position within the eye bounding box, per axis, clamped to [0, 1]
fn iris_ratio(face: &FaceLandmarks, eye: &EyeLayout, geometry: FrameGeometry) -> (f64, f64) {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &idx in &eye.contour {
        let (x, y) = geometry.pixel(face, idx);
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let n = eye.iris.len() as f64;
    let (sum_x, sum_y) = eye.iris.iter().fold((0.0, 0.0), |(sx, sy), &idx| {
        let (x, y) = geometry.pixel(face, idx);
        (sx + x, sy + y)
    });
    let (iris_x, iris_y) = (sum_x / n, sum_y / n);

    let rx = (iris_x - min_x) / (max_x - min_x + SPAN_EPSILON);
    let ry = (iris_y - min_y) / (max_y - min_y + SPAN_EPSILON);
    (rx.clamp(0.0, 1.0), ry.clamp(0.0, 1.0))
}

/// Eye aspect ratio `(|p1-p5| + |p2-p4|) / (2 |p0-p3|)` in pixel space
pub(crate) fn eye_aspect_ratio(face: &FaceLandmarks, eye: &EyeLayout, geometry: FrameGeometry) -> f64 {
    let dist = |a: usize, b: usize| {
        let (ax, ay) = geometry.pixel(face, eye.contour[a]);
        let (bx, by) = geometry.pixel(face, eye.contour[b]);
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    };
    let vertical = dist(1, 5) + dist(2, 4);
    let horizontal = dist(0, 3);
    vertical / (2.0 * horizontal + SPAN_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::landmarks::fixtures::{self, EyeSpec};
    use crate::capture::landmarks::Landmark;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_extracts_known_ratios() {
        let face = fixtures::face(
            EyeSpec::open(0.3, 0.6),
            EyeSpec::open(0.5, 0.4),
            (0.45, 0.55),
        );
        let frame = fixtures::frame(1, 0.0, Some(face));
        let fv = FeatureExtractor::default().extract(&frame).unwrap().unwrap();

        assert!(close(fv.left_x, 0.3));
        assert!(close(fv.left_y, 0.6));
        assert!(close(fv.right_x, 0.5));
        assert!(close(fv.right_y, 0.4));
        assert!(close(fv.avg_x, 0.4));
        assert!(close(fv.avg_y, 0.5));
        assert!(close(fv.diff_x, 0.2));
        assert!(close(fv.diff_y, -0.2));
        assert_eq!(fv.head_x, 0.45);
        assert_eq!(fv.head_y, 0.55);
    }

    #[test]
    fn test_no_face_is_none() {
        let frame = fixtures::frame(1, 0.0, None);
        assert!(FeatureExtractor::default().extract(&frame).unwrap().is_none());
    }

    #[test]
    fn test_truncated_landmarks_are_an_error() {
        let mut face = fixtures::face(EyeSpec::open(0.5, 0.5), EyeSpec::open(0.5, 0.5), (0.5, 0.5));
        face.points.truncate(100);
        let frame = fixtures::frame(1, 0.0, Some(face));

        let err = FeatureExtractor::default().extract(&frame).unwrap_err();
        assert!(matches!(err, GazeError::FeatureExtraction(_)));
    }

    #[test]
    fn test_iris_outside_box_is_clamped() {
        let layout = LandmarkLayout::default();
        let mut face = fixtures::face(EyeSpec::open(0.5, 0.5), EyeSpec::open(0.5, 0.5), (0.5, 0.5));
        for &idx in &layout.left_eye.iris {
            face.points[idx] = Landmark::new(0.99, 0.01);
        }
        let frame = fixtures::frame(1, 0.0, Some(face));
        let fv = FeatureExtractor::default().extract(&frame).unwrap().unwrap();
        assert_eq!(fv.left_x, 1.0);
        assert_eq!(fv.left_y, 0.0);
    }

    #[test]
    fn test_non_finite_landmark_is_an_error() {
        let layout = LandmarkLayout::default();
        let mut face = fixtures::face(EyeSpec::open(0.5, 0.5), EyeSpec::open(0.5, 0.5), (0.5, 0.5));
        face.points[layout.right_eye.contour[0]] = Landmark::new(f64::NAN, 0.4);
        let frame = fixtures::frame(1, 0.0, Some(face));
        assert!(FeatureExtractor::default().extract(&frame).is_err());
    }

    #[test]
    fn test_eye_aspect_ratio_matches_fixture() {
        let layout = LandmarkLayout::default();
        let face = fixtures::face(EyeSpec::closed(0.5, 0.5), EyeSpec::open(0.5, 0.5), (0.5, 0.5));
        let frame = fixtures::frame(1, 0.0, Some(face.clone()));
        let geometry = FrameGeometry::validate(&frame, &face, &layout).unwrap();

        assert!(close(eye_aspect_ratio(&face, &layout.left_eye, geometry), 0.05));
        assert!(close(eye_aspect_ratio(&face, &layout.right_eye, geometry), 0.3));
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = FeatureVector::from_slice(&[0.5; 6]).unwrap_err();
        assert!(matches!(err, GazeError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_mean_and_std_dev() {
        let a = FeatureVector::from_parts((0.2, 0.4), (0.2, 0.4), (0.5, 0.5));
        let b = FeatureVector::from_parts((0.4, 0.6), (0.4, 0.6), (0.5, 0.5));
        let mean = FeatureVector::mean(&[a, b]).unwrap();
        let std = FeatureVector::std_dev(&[a, b]).unwrap();
        assert!(close(mean.avg_x, 0.3));
        assert!(close(std.left_x, 0.1));
        assert_eq!(std.head_x, 0.0);
        assert!(FeatureVector::mean(&[]).is_none());
    }
}
