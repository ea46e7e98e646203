//! Kernel-expanded polynomial used by the service for lens correction.

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use crate::transform::polynomial::coefficient_count;

/// Value of the constant feature appended after the normalised monomials.
pub(crate) const CONSTANT_FEATURE: f64 = 100.0;

/// Monomials of degree `1..=dimension`, before normalisation and without the
/// constant feature.
pub(crate) fn monomial_features(dimension: usize, p: Point) -> Vec<f64> {
    let mut features = Vec::with_capacity(coefficient_count(dimension).saturating_sub(1));
    for i in 1..=dimension {
        for j in (0..=i).rev() {
            features.push(p.x.powi(j as i32) * p.y.powi((i - j) as i32));
        }
    }
    features
}

/// Non-linear coordinate transform.
///
/// Each point is expanded into the monomials of degree `1..=dimension`
/// (ordered `x^j y^(i-j)` with `j` descending), normalised by `norm_mean` and
/// `norm_var`, followed by a constant feature. The output is the product of
/// the feature vector with the `beta` coefficient pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct NonLinearModel {
    dimension: usize,
    beta: Vec<[f64; 2]>,
    norm_mean: Vec<f64>,
    norm_var: Vec<f64>,
    width: u32,
    height: u32,
}

impl NonLinearModel {
    pub fn new(
        dimension: usize,
        beta: Vec<[f64; 2]>,
        norm_mean: Vec<f64>,
        norm_var: Vec<f64>,
        width: u32,
        height: u32,
    ) -> TransformResult<Self> {
        let length = coefficient_count(dimension);
        if beta.len() != length || norm_mean.len() != length || norm_var.len() != length {
            return Err(TransformError::malformed(format!(
                "dimension {dimension} expects {length} coefficients, got beta={}, mean={}, var={}",
                beta.len(),
                norm_mean.len(),
                norm_var.len()
            )));
        }
        Ok(Self {
            dimension,
            beta,
            norm_mean,
            norm_var,
            width,
            height,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn length(&self) -> usize {
        self.beta.len()
    }

    pub fn beta(&self) -> &[[f64; 2]] {
        &self.beta
    }

    pub fn norm_mean(&self) -> &[f64] {
        &self.norm_mean
    }

    pub fn norm_var(&self) -> &[f64] {
        &self.norm_var
    }

    /// Image size the model was calibrated on.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn expand(&self, p: Point) -> Vec<f64> {
        let mut features = monomial_features(self.dimension, p);
        for (k, f) in features.iter_mut().enumerate() {
            *f = (*f - self.norm_mean[k]) / self.norm_var[k];
        }
        features.push(CONSTANT_FEATURE);
        features
    }

    pub fn apply_point(&self, p: Point) -> Point {
        let features = self.expand(p);
        let (x, y) = features
            .iter()
            .zip(&self.beta)
            .fold((0.0, 0.0), |(x, y), (f, b)| (x + f * b[0], y + f * b[1]));
        Point::new(x, y)
    }

    pub fn apply(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply_point(*p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_lengths() {
        let err = NonLinearModel::new(2, vec![[0.0; 2]; 5], vec![0.0; 6], vec![1.0; 6], 10, 10);
        assert!(matches!(err, Err(TransformError::MalformedParameters(_))));
    }

    #[test]
    fn test_first_degree_identity() {
        // features: [x, y, 100]; beta maps them straight through
        let model = NonLinearModel::new(
            1,
            vec![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
            vec![0.0; 3],
            vec![1.0; 3],
            100,
            100,
        )
        .unwrap();
        assert_eq!(model.apply_point(Point::new(4.0, -7.0)), Point::new(4.0, -7.0));
    }

    #[test]
    fn test_normalisation_and_constant() {
        // x' = (x - 2) / 4 + 0.01 * 100
        let model = NonLinearModel::new(
            1,
            vec![[1.0, 0.0], [0.0, 0.0], [0.01, 0.0]],
            vec![2.0, 0.0, 0.0],
            vec![4.0, 1.0, 1.0],
            10,
            10,
        )
        .unwrap();
        let out = model.apply_point(Point::new(10.0, 0.0));
        assert!((out.x - 3.0).abs() < 1e-12);
        assert_eq!(out.y, 0.0);
    }
}
