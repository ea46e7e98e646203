//! Fitting transforms to point correspondences.
//!
//! [`Estimator`] solves weighted least-squares problems for the leaf models
//! that support estimation, and approximates resolved chains by a single
//! polynomial or affine transform.

pub mod approximate;
pub mod least_squares;

pub use approximate::{approximate_as_polynomial, collapse};

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use crate::logging::spans::EstimationSpan;
use crate::transform::{
    AffineModel, LeafModel, NonLinearClass, NonLinearModel, Polynomial2D, RigidModel, SimilarityModel,
    ThinPlateSpline, TranslationModel,
};
use serde::{Deserialize, Serialize};

/// Relative singular value cutoff used when no configuration is supplied.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-10;

/// Corresponding source (`p`) and destination (`q`) points with optional weights.
///
/// Serialized in the service's match layout: coordinates are stored per axis,
/// `{"p": [[x..], [y..]], "q": [[x..], [y..]], "w": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPointMatches", into = "RawPointMatches")]
pub struct PointMatches {
    p: Vec<Point>,
    q: Vec<Point>,
    w: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPointMatches {
    p: [Vec<f64>; 2],
    q: [Vec<f64>; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    w: Option<Vec<f64>>,
}

fn zip_axes(axes: [Vec<f64>; 2], name: &str) -> TransformResult<Vec<Point>> {
    let [xs, ys] = axes;
    if xs.len() != ys.len() {
        return Err(TransformError::malformed(format!(
            "'{name}' has {} x and {} y coordinates",
            xs.len(),
            ys.len()
        )));
    }
    Ok(xs.into_iter().zip(ys).map(|(x, y)| Point::new(x, y)).collect())
}

fn split_axes(points: &[Point]) -> [Vec<f64>; 2] {
    [
        points.iter().map(|p| p.x).collect(),
        points.iter().map(|p| p.y).collect(),
    ]
}

impl TryFrom<RawPointMatches> for PointMatches {
    type Error = TransformError;

    fn try_from(raw: RawPointMatches) -> TransformResult<Self> {
        let matches = PointMatches::new(zip_axes(raw.p, "p")?, zip_axes(raw.q, "q")?)?;
        match raw.w {
            Some(w) => matches.with_weights(w),
            None => Ok(matches),
        }
    }
}

impl From<PointMatches> for RawPointMatches {
    fn from(matches: PointMatches) -> Self {
        RawPointMatches {
            p: split_axes(&matches.p),
            q: split_axes(&matches.q),
            w: matches.w,
        }
    }
}

impl PointMatches {
    pub fn new(p: Vec<Point>, q: Vec<Point>) -> TransformResult<Self> {
        if p.len() != q.len() {
            return Err(TransformError::malformed(format!(
                "point sets differ in length: {} source, {} destination",
                p.len(),
                q.len()
            )));
        }
        Ok(Self { p, q, w: None })
    }

    /// Attach per-pair weights; they must be finite and non-negative.
    pub fn with_weights(mut self, weights: Vec<f64>) -> TransformResult<Self> {
        if weights.len() != self.p.len() {
            return Err(TransformError::malformed(format!(
                "{} weights for {} point pairs",
                weights.len(),
                self.p.len()
            )));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(TransformError::malformed(format!("invalid weight {bad}")));
        }
        self.w = Some(weights);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }

    pub fn p(&self) -> &[Point] {
        &self.p
    }

    pub fn q(&self) -> &[Point] {
        &self.q
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.w.as_deref()
    }

    /// Weight of pair `k`, 1.0 when unweighted.
    pub fn weight(&self, k: usize) -> f64 {
        self.w.as_ref().map_or(1.0, |w| w[k])
    }

    /// Number of pairs with a positive weight.
    pub fn effective_len(&self) -> usize {
        (0..self.len()).filter(|&k| self.weight(k) > 0.0).count()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Point, Point, f64)> + '_ {
        (0..self.len()).map(move |k| (self.p[k], self.q[k], self.weight(k)))
    }
}

/// Unweighted distances between mapped source points and their destinations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Residuals {
    pub rms: f64,
    pub max: f64,
    pub count: usize,
}

impl Residuals {
    pub fn between(mapped: &[Point], expected: &[Point]) -> Self {
        let distances: Vec<f64> = mapped
            .iter()
            .zip(expected)
            .map(|(a, b)| a.distance(b))
            .collect();
        if distances.is_empty() {
            return Self::default();
        }
        let count = distances.len();
        let rms = (distances.iter().map(|d| d * d).sum::<f64>() / count as f64).sqrt();
        let max = distances.iter().copied().fold(0.0, f64::max);
        Self { rms, max, count }
    }
}

/// A fitted model with its residuals over the fitting set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fit<T> {
    pub model: T,
    pub residuals: Residuals,
}

impl<T> Fit<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fit<U> {
        Fit {
            model: f(self.model),
            residuals: self.residuals,
        }
    }
}

/// Models that can be estimated from point matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum ModelKind {
    Translation,
    Rigid,
    Similarity,
    Affine,
    Polynomial { degree: usize },
    /// Kernel-expanded polynomial, encoded as a `NonLinearCoordinateTransform`.
    #[serde(rename = "nonlinear")]
    NonLinear { dimension: usize },
    #[serde(rename = "tps")]
    ThinPlateSpline {
        #[serde(default = "with_affine")]
        affine: bool,
    },
}

fn with_affine() -> bool {
    true
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Rigid => "rigid",
            Self::Similarity => "similarity",
            Self::Affine => "affine",
            Self::Polynomial { .. } => "polynomial",
            Self::NonLinear { .. } => "nonlinear",
            Self::ThinPlateSpline { .. } => "tps",
        }
    }
}

/// Weighted least-squares estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimator {
    /// Singular values below `rank_tolerance * largest` count as zero.
    pub rank_tolerance: f64,
}

impl Default for Estimator {
    fn default() -> Self {
        Self {
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl Estimator {
    pub fn new(rank_tolerance: f64) -> Self {
        Self { rank_tolerance }
    }

    /// Fit the requested model kind and return it as a leaf model.
    pub fn estimate(&self, kind: ModelKind, matches: &PointMatches) -> TransformResult<Fit<LeafModel>> {
        match kind {
            ModelKind::Translation => Ok(self.translation(matches)?.map(LeafModel::Translation)),
            ModelKind::Rigid => Ok(self.rigid(matches)?.map(LeafModel::Rigid)),
            ModelKind::Similarity => Ok(self.similarity(matches)?.map(LeafModel::Similarity)),
            ModelKind::Affine => Ok(self.affine(matches)?.map(LeafModel::Affine)),
            ModelKind::Polynomial { degree } => {
                Ok(self.polynomial(matches, degree)?.map(LeafModel::Polynomial))
            }
            ModelKind::NonLinear { dimension } => Ok(self.non_linear(matches, dimension)?.map(|model| {
                LeafModel::NonLinear {
                    class: NonLinearClass::NonLinearCoordinateTransform,
                    model,
                }
            })),
            ModelKind::ThinPlateSpline { affine } => Ok(self
                .thin_plate_spline(matches, affine)?
                .map(LeafModel::ThinPlateSpline)),
        }
    }

    pub fn translation(&self, matches: &PointMatches) -> TransformResult<Fit<TranslationModel>> {
        let span = EstimationSpan::new("translation", matches.len());
        let model = span.finish(least_squares::fit_translation(matches))?;
        Ok(fitted(&span, model, matches, |m, p| m.to_affine().apply(p)))
    }

    pub fn rigid(&self, matches: &PointMatches) -> TransformResult<Fit<RigidModel>> {
        let span = EstimationSpan::new("rigid", matches.len());
        let model = span.finish(least_squares::fit_similarity(matches, false).map(|s| {
            RigidModel::new(s.theta, s.tx, s.ty)
        }))?;
        Ok(fitted(&span, model, matches, |m, p| m.to_affine().apply(p)))
    }

    pub fn similarity(&self, matches: &PointMatches) -> TransformResult<Fit<SimilarityModel>> {
        let span = EstimationSpan::new("similarity", matches.len());
        let model = span.finish(least_squares::fit_similarity(matches, true))?;
        Ok(fitted(&span, model, matches, |m, p| m.to_affine().apply(p)))
    }

    /// Affine fit; needs at least three non-collinear pairs.
    pub fn affine(&self, matches: &PointMatches) -> TransformResult<Fit<AffineModel>> {
        let span = EstimationSpan::new("affine", matches.len());
        let model = span.finish(
            least_squares::fit_polynomial(matches, 1, self.rank_tolerance).and_then(|p| {
                p.to_affine()
                    .ok_or_else(|| TransformError::malformed("degree-1 fit is not affine"))
            }),
        )?;
        Ok(fitted(&span, model, matches, |m, p| m.apply(p)))
    }

    /// Polynomial fit of total degree `degree`.
    pub fn polynomial(&self, matches: &PointMatches, degree: usize) -> TransformResult<Fit<Polynomial2D>> {
        let span = EstimationSpan::new("polynomial", matches.len());
        let model = span.finish(least_squares::fit_polynomial(matches, degree, self.rank_tolerance))?;
        Ok(fitted(&span, model, matches, |m, p| m.apply(p)))
    }

    /// Non-linear fit with monomials up to total degree `dimension`.
    pub fn non_linear(&self, matches: &PointMatches, dimension: usize) -> TransformResult<Fit<NonLinearModel>> {
        let span = EstimationSpan::new("nonlinear", matches.len());
        let model = span.finish(least_squares::fit_non_linear(matches, dimension, self.rank_tolerance))?;
        Ok(fitted(&span, model, matches, |m, p| m.apply(p)))
    }

    /// Thin-plate spline through the matches, optionally with an affine part.
    pub fn thin_plate_spline(&self, matches: &PointMatches, with_affine: bool) -> TransformResult<Fit<ThinPlateSpline>> {
        let span = EstimationSpan::new("tps", matches.len());
        let model = span.finish(least_squares::fit_thin_plate_spline(
            matches,
            with_affine,
            self.rank_tolerance,
        ))?;
        Ok(fitted(&span, model, matches, |m, p| m.apply(p)))
    }
}

fn fitted<T>(
    span: &EstimationSpan,
    model: T,
    matches: &PointMatches,
    apply: impl Fn(&T, &[Point]) -> Vec<Point>,
) -> Fit<T> {
    let residuals = Residuals::between(&apply(&model, matches.p()), matches.q());
    span.record_residuals(&residuals);
    Fit { model, residuals }
}

/// Fit `kind` with the default rank tolerance.
pub fn estimate(kind: ModelKind, matches: &PointMatches) -> TransformResult<Fit<LeafModel>> {
    Estimator::default().estimate(kind, matches)
}

impl AffineModel {
    pub fn estimate(matches: &PointMatches) -> TransformResult<Fit<AffineModel>> {
        Estimator::default().affine(matches)
    }
}

impl SimilarityModel {
    pub fn estimate(matches: &PointMatches) -> TransformResult<Fit<SimilarityModel>> {
        Estimator::default().similarity(matches)
    }
}

impl RigidModel {
    pub fn estimate(matches: &PointMatches) -> TransformResult<Fit<RigidModel>> {
        Estimator::default().rigid(matches)
    }
}

impl TranslationModel {
    pub fn estimate(matches: &PointMatches) -> TransformResult<Fit<TranslationModel>> {
        Estimator::default().translation(matches)
    }
}

impl Polynomial2D {
    pub fn estimate(matches: &PointMatches, degree: usize) -> TransformResult<Fit<Polynomial2D>> {
        Estimator::default().polynomial(matches, degree)
    }
}

impl NonLinearModel {
    pub fn estimate(matches: &PointMatches, dimension: usize) -> TransformResult<Fit<NonLinearModel>> {
        Estimator::default().non_linear(matches, dimension)
    }
}

impl ThinPlateSpline {
    pub fn estimate(matches: &PointMatches, with_affine: bool) -> TransformResult<Fit<ThinPlateSpline>> {
        Estimator::default().thin_plate_spline(matches, with_affine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1000.0, 1000.0),
            Point::new(1000.0, 0.0),
            Point::new(0.0, 1000.0),
        ]
    }

    #[test]
    fn test_identity_correspondence_gives_identity_affine() {
        let matches = PointMatches::new(corners(), corners()).unwrap();
        let fit = AffineModel::estimate(&matches).unwrap();
        let id = AffineModel::identity();
        for (got, want) in fit.model.matrix().iter().flatten().zip(id.matrix().iter().flatten()) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!(fit.residuals.rms < 1e-9);
        assert_eq!(fit.residuals.count, 4);
    }

    #[test]
    fn test_point_matches_json_layout() {
        let json = r#"{"p": [[0.0, 1.0], [2.0, 3.0]], "q": [[4.0, 5.0], [6.0, 7.0]], "w": [1.0, 0.5]}"#;
        let matches: PointMatches = serde_json::from_str(json).unwrap();
        assert_eq!(matches.p()[1], Point::new(1.0, 3.0));
        assert_eq!(matches.q()[0], Point::new(4.0, 6.0));
        assert_eq!(matches.weight(1), 0.5);

        let back: serde_json::Value = serde_json::to_value(&matches).unwrap();
        assert_eq!(back["p"][0], serde_json::json!([0.0, 1.0]));
    }

    #[test]
    fn test_mismatched_lengths_are_malformed() {
        assert!(PointMatches::new(corners(), corners()[..3].to_vec()).is_err());
        let matches = PointMatches::new(corners(), corners()).unwrap();
        assert!(matches.clone().with_weights(vec![1.0; 3]).is_err());
        assert!(matches.with_weights(vec![1.0, -1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_residuals_report_rms_and_max() {
        let mapped = vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)];
        let expected = vec![Point::new(0.0, 0.0), Point::new(0.0, 0.0)];
        let r = Residuals::between(&mapped, &expected);
        assert_eq!(r.max, 5.0);
        assert!((r.rms - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_model_kind_from_json() {
        let kind: ModelKind = serde_json::from_str(r#"{"model": "polynomial", "degree": 2}"#).unwrap();
        assert_eq!(kind, ModelKind::Polynomial { degree: 2 });
        assert_eq!(kind.name(), "polynomial");

        let kind: ModelKind = serde_json::from_str(r#"{"model": "tps"}"#).unwrap();
        assert_eq!(kind, ModelKind::ThinPlateSpline { affine: true });
        let kind: ModelKind = serde_json::from_str(r#"{"model": "nonlinear", "dimension": 3}"#).unwrap();
        assert_eq!(kind, ModelKind::NonLinear { dimension: 3 });
    }

    #[test]
    fn test_spline_fit_has_zero_residuals_and_inverts() {
        let p = corners()
            .into_iter()
            .chain([Point::new(400.0, 300.0), Point::new(700.0, 650.0)])
            .collect::<Vec<_>>();
        let q: Vec<Point> = p
            .iter()
            .zip([0.0, 1.5, -2.0, 0.5, 3.0, -1.0])
            .map(|(p, d)| Point::new(p.x + 20.0 + d, p.y - 10.0 + 0.5 * d))
            .collect();
        let matches = PointMatches::new(p.clone(), q.clone()).unwrap();
        let fit = estimate(ModelKind::ThinPlateSpline { affine: true }, &matches).unwrap();
        assert!(fit.residuals.max < 1e-6, "{:?}", fit.residuals);

        let back = fit.model.invert(&q, 1e-10).unwrap();
        for (got, want) in back.iter().zip(&p) {
            assert!(got.distance(want) < 1e-3, "{got:?} != {want:?}");
        }
    }

    #[test]
    fn test_non_linear_estimate_is_a_coordinate_transform() {
        let p: Vec<Point> = (0..16)
            .map(|k| Point::new((k % 4) as f64 * 300.0, (k / 4) as f64 * 250.0))
            .collect();
        let q: Vec<Point> = p.iter().map(|p| Point::new(p.x * 0.98 + 12.0, p.y * 1.02 - 5.0)).collect();
        let matches = PointMatches::new(p, q).unwrap();
        let fit = estimate(ModelKind::NonLinear { dimension: 1 }, &matches).unwrap();
        assert!(fit.residuals.rms < 1e-9);
        assert!(matches!(
            fit.model,
            LeafModel::NonLinear {
                class: NonLinearClass::NonLinearCoordinateTransform,
                ..
            }
        ));
    }
}
