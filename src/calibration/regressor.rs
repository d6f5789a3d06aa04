//! Polynomial ridge regression from gaze features to screen coordinates
//!
//! Features are expanded into every monomial of degree `1..=d` (ordered like
//! scikit-learn's `PolynomialFeatures` without the bias column), standardized
//! column-wise with unweighted statistics, and fitted per axis with a weighted
//! ridge loss. The intercept is not penalized.

use crate::capture::features::{FeatureVector, FEATURE_SCHEMA_VERSION};
use crate::error::{GazeError, GazeResult};
use crate::screen::ScreenPoint;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Bumped whenever the persisted model layout changes
pub const MODEL_SCHEMA_VERSION: u32 = 1;

/// Highest polynomial degree a model may use
pub const MAX_DEGREE: usize = 4;

const MIN_SCALE: f64 = 1e-12;

/// Monomial expansion of a fixed-length input
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialFeatures {
    input_len: usize,
    degree: usize,
    terms: Vec<Vec<usize>>,
}

impl PolynomialFeatures {
    pub fn new(input_len: usize, degree: usize) -> Self {
        let terms = (1..=degree)
            .flat_map(|d| combinations_with_replacement(input_len, d))
            .collect();
        Self {
            input_len,
            degree,
            terms,
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// Expand one input row; `input.len()` must equal `input_len`
    pub fn transform(&self, input: &[f64]) -> Vec<f64> {
        self.terms
            .iter()
            .map(|term| term.iter().map(|&i| input[i]).product())
            .collect()
    }
}

/// Number of monomials of degree `1..=degree` over `input_len` inputs,
/// C(n + d, d) - 1, or `None` on overflow
pub fn term_count(input_len: usize, degree: usize) -> Option<usize> {
    // C(n + k, k) = C(n + k - 1, k - 1) * (n + k) / k, exact at every step
    let mut count: usize = 1;
    for k in 1..=degree {
        count = count.checked_mul(input_len.checked_add(k)?)? / k;
    }
    Some(count - 1)
}

/// Index tuples `i1 <= i2 <= ... <= ik` in lexicographic order
fn combinations_with_replacement(n: usize, k: usize) -> Vec<Vec<usize>> {
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = vec![0; k];
    loop {
        out.push(current.clone());
        let Some(pos) = (0..k).rev().find(|&i| current[i] < n - 1) else {
            break;
        };
        let next = current[pos] + 1;
        current[pos..].iter_mut().for_each(|c| *c = next);
    }
    out
}

/// One weighted observation for [`GazeRegressor::fit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub target: ScreenPoint,
    pub weight: f64,
}

/// Fitted mapping from [`FeatureVector`] to screen pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredRegressor", into = "StoredRegressor")]
pub struct GazeRegressor {
    basis: PolynomialFeatures,
    means: Vec<f64>,
    scales: Vec<f64>,
    coef_x: Vec<f64>,
    coef_y: Vec<f64>,
    intercept_x: f64,
    intercept_y: f64,
    alpha: f64,
}

impl GazeRegressor {
    /// Fit both axes with weighted ridge regression
    pub fn fit(samples: &[TrainingSample], degree: usize, alpha: f64) -> GazeResult<Self> {
        if samples.is_empty() {
            return Err(GazeError::CalibrationFit("no calibration samples".to_string()));
        }
        if degree == 0 || degree > MAX_DEGREE {
            return Err(GazeError::CalibrationFit(format!(
                "degree must be in 1..={} (got {})",
                MAX_DEGREE, degree
            )));
        }
        if !(alpha >= 0.0) || !alpha.is_finite() {
            return Err(GazeError::CalibrationFit(format!("invalid ridge alpha {}", alpha)));
        }
        for s in samples {
            if !s.features.is_finite() || !s.target.is_finite() {
                return Err(GazeError::CalibrationFit("non-finite training sample".to_string()));
            }
            if !(s.weight > 0.0) || !s.weight.is_finite() {
                return Err(GazeError::CalibrationFit(format!(
                    "invalid sample weight {}",
                    s.weight
                )));
            }
        }
        if samples.len() > 1 && samples.windows(2).all(|pair| pair[0].features == pair[1].features) {
            return Err(GazeError::CalibrationFit(
                "all calibration features are identical".to_string(),
            ));
        }

        let basis = PolynomialFeatures::new(FeatureVector::LEN, degree);
        let n = samples.len();
        let p = basis.n_terms();
        let mut expanded = DMatrix::<f64>::zeros(n, p);
        for (i, sample) in samples.iter().enumerate() {
            for (j, v) in basis.transform(&sample.features.to_array()).into_iter().enumerate() {
                expanded[(i, j)] = v;
            }
        }
        // Unweighted column statistics keep the transform independent of role weights
        let mut means = vec![0.0; p];
        let mut scales = vec![1.0; p];
        for j in 0..p {
            let col = expanded.column(j);
            let mean = col.mean();
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            means[j] = mean;
            let std = var.sqrt();
            scales[j] = if std > MIN_SCALE { std } else { 1.0 };
        }
        let standardized = DMatrix::from_fn(n, p, |i, j| (expanded[(i, j)] - means[j]) / scales[j]);

        let weights: Vec<f64> = samples.iter().map(|s| s.weight).collect();
        let weight_sum: f64 = weights.iter().sum();

        // Weighted centering absorbs the unpenalized intercept
        let z_bar: Vec<f64> = (0..p)
            .map(|j| {
                (0..n)
                    .map(|i| weights[i] * standardized[(i, j)])
                    .sum::<f64>()
                    / weight_sum
            })
            .collect();
        let y_bar_x = samples.iter().map(|s| s.weight * s.target.x).sum::<f64>() / weight_sum;
        let y_bar_y = samples.iter().map(|s| s.weight * s.target.y).sum::<f64>() / weight_sum;

        let centered = DMatrix::from_fn(n, p, |i, j| standardized[(i, j)] - z_bar[j]);
        let weighted = DMatrix::from_fn(n, p, |i, j| centered[(i, j)] * weights[i]);
        let targets = DMatrix::from_fn(n, 2, |i, k| match k {
            0 => samples[i].target.x - y_bar_x,
            _ => samples[i].target.y - y_bar_y,
        });

        let gram = centered.transpose() * &weighted + DMatrix::<f64>::identity(p, p) * alpha;
        let rhs = weighted.transpose() * &targets;
        let solution = gram
            .cholesky()
            .ok_or_else(|| {
                GazeError::CalibrationFit("singular design matrix (Cholesky failed)".to_string())
            })?
            .solve(&rhs);

        if solution.iter().any(|v| !v.is_finite()) {
            return Err(GazeError::CalibrationFit("non-finite regression solution".to_string()));
        }

        let coef_x: Vec<f64> = solution.column(0).iter().copied().collect();
        let coef_y: Vec<f64> = solution.column(1).iter().copied().collect();
        let dot = |coef: &[f64]| coef.iter().zip(&z_bar).map(|(c, z)| c * z).sum::<f64>();
        let intercept_x = y_bar_x - dot(&coef_x);
        let intercept_y = y_bar_y - dot(&coef_y);

        tracing::debug!(
            "Fitted degree-{} ridge model: {} samples, {} terms, alpha {}",
            degree,
            n,
            p,
            alpha
        );

        Ok(Self {
            basis,
            means,
            scales,
            coef_x,
            coef_y,
            intercept_x,
            intercept_y,
            alpha,
        })
    }

    pub fn degree(&self) -> usize {
        self.basis.degree()
    }

    pub fn n_terms(&self) -> usize {
        self.basis.n_terms()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn predict(&self, features: &FeatureVector) -> GazeResult<ScreenPoint> {
        self.predict_slice(&features.to_array())
    }

    /// Predict from a raw feature slice; wrong-length input is a schema error
    pub fn predict_slice(&self, features: &[f64]) -> GazeResult<ScreenPoint> {
        if features.len() != self.basis.input_len() {
            return Err(GazeError::schema(
                format!("{} features", self.basis.input_len()),
                format!("{} features", features.len()),
            ));
        }
        let expanded = self.basis.transform(features);
        let (mut x, mut y) = (self.intercept_x, self.intercept_y);
        for (j, v) in expanded.into_iter().enumerate() {
            let z = (v - self.means[j]) / self.scales[j];
            x += self.coef_x[j] * z;
            y += self.coef_y[j] * z;
        }
        Ok(ScreenPoint::new(x, y))
    }

    pub fn to_json(&self) -> GazeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| GazeError::Persistence(e.to_string()))
    }

    /// Parse and validate a persisted model
    pub fn from_json(json: &str) -> GazeResult<Self> {
        let stored: StoredRegressor =
            serde_json::from_str(json).map_err(|e| GazeError::Persistence(e.to_string()))?;
        Self::try_from(stored)
    }
}

/// On-disk layout of [`GazeRegressor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRegressor {
    schema_version: u32,
    feature_schema_version: u32,
    input_len: usize,
    degree: usize,
    n_terms: usize,
    means: Vec<f64>,
    scales: Vec<f64>,
    coef_x: Vec<f64>,
    coef_y: Vec<f64>,
    intercept_x: f64,
    intercept_y: f64,
    alpha: f64,
}

impl From<GazeRegressor> for StoredRegressor {
    fn from(model: GazeRegressor) -> Self {
        Self {
            schema_version: MODEL_SCHEMA_VERSION,
            feature_schema_version: FEATURE_SCHEMA_VERSION,
            input_len: model.basis.input_len(),
            degree: model.basis.degree(),
            n_terms: model.basis.n_terms(),
            means: model.means,
            scales: model.scales,
            coef_x: model.coef_x,
            coef_y: model.coef_y,
            intercept_x: model.intercept_x,
            intercept_y: model.intercept_y,
            alpha: model.alpha,
        }
    }
}

impl TryFrom<StoredRegressor> for GazeRegressor {
    type Error = GazeError;

    fn try_from(stored: StoredRegressor) -> GazeResult<Self> {
        if stored.schema_version != MODEL_SCHEMA_VERSION {
            return Err(GazeError::schema(
                format!("model schema {}", MODEL_SCHEMA_VERSION),
                format!("model schema {}", stored.schema_version),
            ));
        }
        if stored.feature_schema_version != FEATURE_SCHEMA_VERSION {
            return Err(GazeError::schema(
                format!("feature schema {}", FEATURE_SCHEMA_VERSION),
                format!("feature schema {}", stored.feature_schema_version),
            ));
        }
        if stored.input_len != FeatureVector::LEN {
            return Err(GazeError::schema(
                format!("{} features", FeatureVector::LEN),
                format!("{} features", stored.input_len),
            ));
        }

        if stored.degree == 0 || stored.degree > MAX_DEGREE {
            return Err(GazeError::schema(
                format!("degree in 1..={}", MAX_DEGREE),
                format!("degree {}", stored.degree),
            ));
        }

        // Check the layout before building the expansion
        let p = term_count(stored.input_len, stored.degree).unwrap_or(0);
        let lengths = [
            stored.n_terms,
            stored.means.len(),
            stored.scales.len(),
            stored.coef_x.len(),
            stored.coef_y.len(),
        ];
        if p == 0 || lengths.iter().any(|&len| len != p) {
            return Err(GazeError::schema(
                format!("{} terms for degree {}", p, stored.degree),
                format!("{:?}", lengths),
            ));
        }
        let basis = PolynomialFeatures::new(stored.input_len, stored.degree);

        let all_finite = stored
            .means
            .iter()
            .chain(&stored.scales)
            .chain(&stored.coef_x)
            .chain(&stored.coef_y)
            .chain([&stored.intercept_x, &stored.intercept_y])
            .all(|v| v.is_finite());
        if !all_finite || stored.scales.iter().any(|&s| s <= 0.0) {
            return Err(GazeError::Persistence(
                "model contains invalid coefficients".to_string(),
            ));
        }

        Ok(Self {
            basis,
            means: stored.means,
            scales: stored.scales,
            coef_x: stored.coef_x,
            coef_y: stored.coef_y,
            intercept_x: stored.intercept_x,
            intercept_y: stored.intercept_y,
            alpha: stored.alpha,
        })
    }
}

/// Training-error grade shown to the user after calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationQuality {
    Good,
    Marginal,
    Poor,
}

impl CalibrationQuality {
    pub fn grade(error_px: f64, good_px: f64, marginal_px: f64) -> Self {
        if error_px < good_px {
            Self::Good
        } else if error_px < marginal_px {
            Self::Marginal
        } else {
            Self::Poor
        }
    }
}

impl std::fmt::Display for CalibrationQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Marginal => write!(f, "marginal"),
            Self::Poor => write!(f, "poor (recalibrate)"),
        }
    }
}

/// Prediction error at one calibration point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointResidual {
    pub index: usize,
    pub target: ScreenPoint,
    pub predicted: ScreenPoint,
    pub error_x: f64,
    pub error_y: f64,
}

/// In-sample fit quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitReport {
    pub mean_abs_error_x: f64,
    pub mean_abs_error_y: f64,
    pub residuals: Vec<PointResidual>,
    pub quality: CalibrationQuality,
}

impl FitReport {
    /// Evaluate `model` on `(index, features, target)` triples
    pub fn evaluate<'a>(
        model: &GazeRegressor,
        points: impl IntoIterator<Item = (usize, &'a FeatureVector, ScreenPoint)>,
        good_px: f64,
        marginal_px: f64,
    ) -> GazeResult<Self> {
        let mut residuals = Vec::new();
        for (index, features, target) in points {
            let predicted = model.predict(features)?;
            residuals.push(PointResidual {
                index,
                target,
                predicted,
                error_x: (predicted.x - target.x).abs(),
                error_y: (predicted.y - target.y).abs(),
            });
        }
        let n = residuals.len().max(1) as f64;
        let mean_abs_error_x = residuals.iter().map(|r| r.error_x).sum::<f64>() / n;
        let mean_abs_error_y = residuals.iter().map(|r| r.error_y).sum::<f64>() / n;
        let quality = CalibrationQuality::grade(
            mean_abs_error_x.max(mean_abs_error_y),
            good_px,
            marginal_px,
        );
        Ok(Self {
            mean_abs_error_x,
            mean_abs_error_y,
            residuals,
            quality,
        })
    }

    /// Sum of squared errors over the given point indices
    pub fn squared_error(&self, indices: &[usize]) -> f64 {
        self.residuals
            .iter()
            .filter(|r| indices.contains(&r.index))
            .map(|r| r.error_x.powi(2) + r.error_y.powi(2))
            .sum()
    }
}
