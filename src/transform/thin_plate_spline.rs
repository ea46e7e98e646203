//! Thin-plate spline with an `r² log r` kernel.
//!
//! A point is displaced by an optional affine offset `A·p + b` plus the sum of
//! the kernel responses to every landmark, each scaled by that landmark's
//! coefficient pair. The inverse has no closed form and is found by a fixed
//! point iteration.

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use crate::transform::affine::AffineModel;

/// Landmark distances below this contribute nothing.
const KERNEL_CUTOFF: f64 = 1e-8;

/// `r² log r`, zero at (and very near) the origin.
pub(crate) fn kernel(r: f64) -> f64 {
    if r > KERNEL_CUTOFF {
        r * r * r.ln()
    } else {
        0.0
    }
}

/// Step control for inverting a spline numerically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterativeInverse {
    /// Fraction of the current error removed per iteration.
    pub gamma: f64,
    /// Stop once a step moves the estimate less than this.
    pub precision: f64,
    pub max_iterations: usize,
}

impl Default for IterativeInverse {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            precision: 1e-4,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThinPlateSpline {
    offset: Option<AffineModel>,
    landmarks: Vec<Point>,
    coefficients: Vec<[f64; 2]>,
}

impl ThinPlateSpline {
    /// `offset` is added to the identity, so `None` and a zero offset agree.
    pub fn new(
        offset: Option<AffineModel>,
        landmarks: Vec<Point>,
        coefficients: Vec<[f64; 2]>,
    ) -> TransformResult<Self> {
        if landmarks.len() != coefficients.len() {
            return Err(TransformError::malformed(format!(
                "{} landmarks but {} coefficient pairs",
                landmarks.len(),
                coefficients.len()
            )));
        }
        Ok(Self {
            offset,
            landmarks,
            coefficients,
        })
    }

    pub fn offset(&self) -> Option<&AffineModel> {
        self.offset.as_ref()
    }

    pub fn landmarks(&self) -> &[Point] {
        &self.landmarks
    }

    pub fn coefficients(&self) -> &[[f64; 2]] {
        &self.coefficients
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn apply_point(&self, p: Point) -> Point {
        let (mut x, mut y) = self
            .landmarks
            .iter()
            .zip(&self.coefficients)
            .fold((p.x, p.y), |(x, y), (l, c)| {
                let u = kernel(l.distance(&p));
                (x + u * c[0], y + u * c[1])
            });
        if let Some(offset) = &self.offset {
            let shift = offset.apply_point(p);
            x += shift.x;
            y += shift.y;
        }
        Point::new(x, y)
    }

    pub fn apply(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply_point(*p)).collect()
    }

    /// Source point that maps onto `target`.
    pub fn invert_point(&self, target: Point, search: &IterativeInverse) -> TransformResult<Point> {
        let mut current = target;
        for _ in 0..search.max_iterations {
            let mapped = self.apply_point(current);
            let next = Point::new(
                current.x - search.gamma * (mapped.x - target.x),
                current.y - search.gamma * (mapped.y - target.y),
            );
            let step = next.distance(&current);
            current = next;
            if step <= search.precision {
                return Ok(current);
            }
        }
        Err(TransformError::NotConverged {
            operation: "invert",
            iterations: search.max_iterations,
        })
    }

    pub fn invert(&self, points: &[Point], search: &IterativeInverse) -> TransformResult<Vec<Point>> {
        points.iter().map(|p| self.invert_point(*p, search)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump() -> ThinPlateSpline {
        ThinPlateSpline::new(
            Some(AffineModel::new(0.01, 0.0, 0.0, -0.02, 5.0, -3.0)),
            vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0), Point::new(0.0, 100.0)],
            vec![[1e-4, 0.0], [0.0, -2e-4], [5e-5, 5e-5]],
        )
        .unwrap()
    }

    #[test]
    fn test_kernel_vanishes_at_landmarks() {
        assert_eq!(kernel(0.0), 0.0);
        assert_eq!(kernel(1.0), 0.0);
        assert!((kernel(std::f64::consts::E) - std::f64::consts::E.powi(2)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_spline_is_identity() {
        let tps = ThinPlateSpline::new(None, Vec::new(), Vec::new()).unwrap();
        assert_eq!(tps.apply_point(Point::new(3.0, 4.0)), Point::new(3.0, 4.0));
    }

    #[test]
    fn test_mismatched_lengths_are_malformed() {
        let err = ThinPlateSpline::new(None, vec![Point::new(0.0, 0.0)], Vec::new()).unwrap_err();
        assert!(matches!(err, TransformError::MalformedParameters(_)));
    }

    #[test]
    fn test_iterative_inverse_recovers_source() {
        let tps = bump();
        let p = Point::new(40.0, 60.0);
        let q = tps.apply_point(p);
        let search = IterativeInverse {
            precision: 1e-10,
            ..IterativeInverse::default()
        };
        let back = tps.invert_point(q, &search).unwrap();
        assert!(back.distance(&p) < 1e-8, "{back:?}");
    }

    #[test]
    fn test_inverse_reports_non_convergence() {
        let search = IterativeInverse {
            max_iterations: 1,
            precision: 0.0,
            ..IterativeInverse::default()
        };
        let err = bump().invert_point(Point::new(40.0, 60.0), &search).unwrap_err();
        assert_eq!(
            err,
            TransformError::NotConverged {
                operation: "invert",
                iterations: 1
            }
        );
    }
}
