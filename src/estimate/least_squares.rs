//! Weighted least-squares solvers.
//!
//! Polynomial (and therefore affine) fits build a shared design matrix over
//! normalised source coordinates and solve both output coordinates with one
//! SVD. Translation, rigid and similarity fits use closed forms. Thin-plate
//! splines solve the square kernel system, and non-linear models a
//! standardised feature expansion.

use crate::error::{TransformError, TransformResult};
use crate::estimate::PointMatches;
use crate::geometry::{Bounds, Point};
use crate::transform::nonlinear::{monomial_features, CONSTANT_FEATURE};
use crate::transform::polynomial::{checked_coefficient_count, coefficient_count, monomials};
use crate::transform::thin_plate_spline::kernel;
use crate::transform::{
    AffineModel, NonLinearModel, Polynomial2D, SimilarityModel, ThinPlateSpline, TranslationModel,
};
use nalgebra::{DMatrix, DVector};

/// Weighted centroids of the source and destination points.
fn centroids(matches: &PointMatches) -> Option<(Point, Point, f64)> {
    let (sp, sq, sw) = matches.iter().fold(
        (Point::new(0.0, 0.0), Point::new(0.0, 0.0), 0.0),
        |(sp, sq, sw), (p, q, w)| {
            (
                Point::new(sp.x + w * p.x, sp.y + w * p.y),
                Point::new(sq.x + w * q.x, sq.y + w * q.y),
                sw + w,
            )
        },
    );
    (sw > 0.0).then(|| (Point::new(sp.x / sw, sp.y / sw), Point::new(sq.x / sw, sq.y / sw), sw))
}

pub fn fit_translation(matches: &PointMatches) -> TransformResult<TranslationModel> {
    let (pc, qc, _) = centroids(matches).ok_or(TransformError::InsufficientData {
        required: 1,
        provided: matches.effective_len(),
    })?;
    Ok(TranslationModel::new(qc.x - pc.x, qc.y - pc.y))
}

/// Closed-form 2-D Umeyama fit. With `with_scale == false` the scale is fixed to 1.
pub fn fit_similarity(matches: &PointMatches, with_scale: bool) -> TransformResult<SimilarityModel> {
    let insufficient = || TransformError::InsufficientData {
        required: 2,
        provided: matches.effective_len(),
    };
    if matches.effective_len() < 2 {
        return Err(insufficient());
    }
    let (pc, qc, _) = centroids(matches).ok_or_else(insufficient)?;

    let (mut a, mut b, mut spread) = (0.0, 0.0, 0.0);
    for (p, q, w) in matches.iter() {
        let (px, py) = (p.x - pc.x, p.y - pc.y);
        let (qx, qy) = (q.x - qc.x, q.y - qc.y);
        a += w * (px * qx + py * qy);
        b += w * (px * qy - py * qx);
        spread += w * (px * px + py * py);
    }
    // all weighted source points coincide
    if spread <= f64::EPSILON * (pc.x * pc.x + pc.y * pc.y).max(1.0) {
        return Err(TransformError::InsufficientData {
            required: 2,
            provided: 1,
        });
    }

    let theta = b.atan2(a);
    let scale = if with_scale { a.hypot(b) / spread } else { 1.0 };
    let (s, c) = theta.sin_cos();
    Ok(SimilarityModel::new(
        scale,
        theta,
        qc.x - scale * (c * pc.x - s * pc.y),
        qc.y - scale * (s * pc.x + c * pc.y),
    ))
}

/// Affine map `u = (x - cx) / s` that brings the source points near the unit square.
#[derive(Debug, Clone, Copy)]
struct Normalisation {
    cx: f64,
    cy: f64,
    scale: f64,
}

impl Normalisation {
    const IDENTITY: Self = Self {
        cx: 0.0,
        cy: 0.0,
        scale: 1.0,
    };

    fn of(points: &[Point]) -> Self {
        let n = points.len().max(1) as f64;
        let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
        let extent = points
            .iter()
            .map(|p| (p.x - cx).abs().max((p.y - cy).abs()))
            .fold(0.0, f64::max);
        Self {
            cx,
            cy,
            scale: if extent > 0.0 { extent } else { 1.0 },
        }
    }

    fn apply(&self, p: Point) -> Point {
        Point::new((p.x - self.cx) / self.scale, (p.y - self.cy) / self.scale)
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Position of `x^a y^b` in the coefficient order.
fn monomial_index(a: usize, b: usize) -> usize {
    let degree = a + b;
    degree * (degree + 1) / 2 + b
}

/// Rewrite coefficients over normalised coordinates as coefficients over raw ones.
fn denormalise(coefficients: &[f64], order: usize, n: &Normalisation) -> Vec<f64> {
    let mut out = vec![0.0; coefficient_count(order)];
    for j in 0..=order {
        for i in 0..=j {
            let c = coefficients[monomial_index(j - i, i)];
            if c == 0.0 {
                continue;
            }
            let (a, b) = (j - i, i);
            let c = c / n.scale.powi(j as i32);
            // (x - cx)^a (y - cy)^b
            for k in 0..=a {
                let ax = binomial(a, k) * (-n.cx).powi((a - k) as i32);
                for l in 0..=b {
                    let by = binomial(b, l) * (-n.cy).powi((b - l) as i32);
                    out[monomial_index(k, l)] += c * ax * by;
                }
            }
        }
    }
    out
}

/// Polynomial fit of total degree `order` by weighted SVD least squares.
pub fn fit_polynomial(matches: &PointMatches, order: usize, rank_tolerance: f64) -> TransformResult<Polynomial2D> {
    let k = coefficient_count(order);
    let provided = matches.effective_len();
    if provided < k {
        return Err(TransformError::InsufficientData { required: k, provided });
    }

    let norm = Normalisation::of(matches.p());
    let rows: Vec<(Vec<f64>, Point, f64)> = matches
        .iter()
        .filter(|(_, _, w)| *w > 0.0)
        .map(|(p, q, w)| (monomials(norm.apply(p), order), q, w.sqrt()))
        .collect();

    let n = rows.len();
    let design = DMatrix::from_fn(n, k, |r, c| rows[r].0[c] * rows[r].2);
    let rhs_x = DVector::from_fn(n, |r, _| rows[r].1.x * rows[r].2);
    let rhs_y = DVector::from_fn(n, |r, _| rows[r].1.y * rows[r].2);
    let [x, y] = solve_full_rank(design, [rhs_x, rhs_y], rank_tolerance)?;

    Polynomial2D::new(
        denormalise(x.as_slice(), order, &norm),
        denormalise(y.as_slice(), order, &norm),
    )
}

/// Solve `design · c = rhs` for both coordinates; the design must have full column rank.
fn solve_full_rank(
    design: DMatrix<f64>,
    rhs: [DVector<f64>; 2],
    rank_tolerance: f64,
) -> TransformResult<[DVector<f64>; 2]> {
    let k = design.ncols();
    let svd = design.svd(true, true);
    let eps = rank_tolerance * svd.singular_values.max();
    let rank = svd.rank(eps);
    if rank < k {
        return Err(TransformError::InsufficientData {
            required: k,
            provided: rank,
        });
    }

    let solve = |rhs: &DVector<f64>| {
        svd.solve(rhs, eps)
            .map_err(|e| TransformError::malformed(format!("least-squares solve failed: {e}")))
    };
    let [x, y] = &rhs;
    Ok([solve(x)?, solve(y)?])
}

/// `x`, `y` and `1` columns of the spline's affine block.
fn affine_basis(p: Point, k: usize) -> f64 {
    match k {
        0 => p.x,
        1 => p.y,
        _ => 1.0,
    }
}

/// Thin-plate spline through every positively weighted pair.
///
/// With `with_affine` the affine block is solved together with the kernel
/// coefficients, which then sum to zero and have zero first moments. Without
/// it the kernel alone carries the displacement. Weights only select pairs.
pub fn fit_thin_plate_spline(
    matches: &PointMatches,
    with_affine: bool,
    rank_tolerance: f64,
) -> TransformResult<ThinPlateSpline> {
    let (landmarks, targets): (Vec<Point>, Vec<Point>) = matches
        .iter()
        .filter(|(_, _, w)| *w > 0.0)
        .map(|(p, q, _)| (p, q))
        .unzip();
    let n = landmarks.len();
    let required = if with_affine { 3 } else { 1 };
    if n < required {
        return Err(TransformError::InsufficientData { required, provided: n });
    }

    // under the side conditions rescaling only shifts the kernel by a constant
    let norm = if with_affine {
        Normalisation::of(&landmarks)
    } else {
        Normalisation::IDENTITY
    };
    let scaled: Vec<Point> = landmarks.iter().map(|p| norm.apply(*p)).collect();
    let size = if with_affine { n + 3 } else { n };
    let system = DMatrix::from_fn(size, size, |r, c| match (r < n, c < n) {
        (true, true) => kernel(scaled[r].distance(&scaled[c])),
        (true, false) => affine_basis(scaled[r], c - n),
        (false, true) => affine_basis(scaled[c], r - n),
        (false, false) => 0.0,
    });
    let displacement = |r: usize, axis: fn(Point) -> f64| {
        if r < n {
            axis(targets[r]) - axis(landmarks[r])
        } else {
            0.0
        }
    };
    let rhs_x = DVector::from_fn(size, |r, _| displacement(r, |p| p.x));
    let rhs_y = DVector::from_fn(size, |r, _| displacement(r, |p| p.y));
    let [dx, dy] = solve_full_rank(system, [rhs_x, rhs_y], rank_tolerance)?;

    let s2 = norm.scale * norm.scale;
    let coefficients = (0..n).map(|j| [dx[j] / s2, dy[j] / s2]).collect();
    let offset = with_affine.then(|| {
        let log_scale = norm.scale.ln();
        let shift = |d: &DVector<f64>| {
            log_scale
                * scaled
                    .iter()
                    .enumerate()
                    .map(|(j, l)| d[j] * (l.x * l.x + l.y * l.y))
                    .sum::<f64>()
        };
        let (m00, m01) = (dx[n] / norm.scale, dx[n + 1] / norm.scale);
        let (m10, m11) = (dy[n] / norm.scale, dy[n + 1] / norm.scale);
        AffineModel::new(
            m00,
            m01,
            m10,
            m11,
            dx[n + 2] - m00 * norm.cx - m01 * norm.cy - shift(&dx),
            dy[n + 2] - m10 * norm.cx - m11 * norm.cy - shift(&dy),
        )
    });
    ThinPlateSpline::new(offset, landmarks, coefficients)
}

/// Kernel-expanded polynomial fit of total degree `dimension`.
///
/// Every monomial feature is standardised by its mean and population standard
/// deviation over the source points. The calibration size is the ceiling of
/// the largest source coordinates.
pub fn fit_non_linear(matches: &PointMatches, dimension: usize, rank_tolerance: f64) -> TransformResult<NonLinearModel> {
    let length = checked_coefficient_count(dimension)
        .ok_or_else(|| TransformError::malformed(format!("dimension {dimension} is too large")))?;
    let rows: Vec<(Vec<f64>, Point, f64)> = matches
        .iter()
        .filter(|(_, _, w)| *w > 0.0)
        .map(|(p, q, w)| (monomial_features(dimension, p), q, w.sqrt()))
        .collect();
    let provided = rows.len();
    if provided < length {
        return Err(TransformError::InsufficientData {
            required: length,
            provided,
        });
    }

    let n = provided as f64;
    let features = length - 1;
    let mut norm_mean: Vec<f64> = (0..features)
        .map(|k| rows.iter().map(|r| r.0[k]).sum::<f64>() / n)
        .collect();
    let mut norm_var: Vec<f64> = (0..features)
        .map(|k| {
            let mean = norm_mean[k];
            let std = (rows.iter().map(|r| (r.0[k] - mean).powi(2)).sum::<f64>() / n).sqrt();
            // a constant feature stays degenerate and fails the rank check
            if std > f64::EPSILON * mean.abs().max(1.0) {
                std
            } else {
                1.0
            }
        })
        .collect();

    let design = DMatrix::from_fn(provided, length, |r, c| {
        let f = if c < features {
            (rows[r].0[c] - norm_mean[c]) / norm_var[c]
        } else {
            CONSTANT_FEATURE
        };
        f * rows[r].2
    });
    let rhs_x = DVector::from_fn(provided, |r, _| rows[r].1.x * rows[r].2);
    let rhs_y = DVector::from_fn(provided, |r, _| rows[r].1.y * rows[r].2);
    let [bx, by] = solve_full_rank(design, [rhs_x, rhs_y], rank_tolerance)?;

    let beta = bx.iter().zip(by.iter()).map(|(x, y)| [*x, *y]).collect();
    norm_mean.push(CONSTANT_FEATURE);
    norm_var.push(0.0);
    let (width, height) = Bounds::enclosing(matches.p())
        .map_or((0, 0), |b| (b.max_x.ceil() as u32, b.max_y.ceil() as u32));
    NonLinearModel::new(dimension, beta, norm_mean, norm_var, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monomial_index_matches_order() {
        // order 2: 1, x, y, x^2, xy, y^2
        assert_eq!(monomial_index(0, 0), 0);
        assert_eq!(monomial_index(1, 0), 1);
        assert_eq!(monomial_index(0, 1), 2);
        assert_eq!(monomial_index(2, 0), 3);
        assert_eq!(monomial_index(1, 1), 4);
        assert_eq!(monomial_index(0, 2), 5);
    }

    #[test]
    fn test_denormalise_preserves_values() {
        let norm = Normalisation {
            cx: 500.0,
            cy: -250.0,
            scale: 400.0,
        };
        let coefficients = [0.5, 1.5, -2.0, 0.25, 3.0, -1.0];
        let raw = denormalise(&coefficients, 2, &norm);
        let p = Point::new(812.0, 33.0);
        let eval = |c: &[f64], q: Point| monomials(q, 2).iter().zip(c).map(|(m, c)| m * c).sum::<f64>();
        let expected = eval(&coefficients, norm.apply(p));
        assert!((eval(&raw, p) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points_are_rank_deficient() {
        let p: Vec<Point> = (0..5).map(|i| Point::new(i as f64, 2.0 * i as f64)).collect();
        let matches = PointMatches::new(p.clone(), p).unwrap();
        let err = fit_polynomial(&matches, 1, 1e-10).unwrap_err();
        assert!(matches!(err, TransformError::InsufficientData { required: 3, provided: 2 }));
    }

    #[test]
    fn test_zero_weights_do_not_count() {
        let p = vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        let matches = PointMatches::new(p.clone(), p)
            .unwrap()
            .with_weights(vec![1.0, 1.0, 0.0])
            .unwrap();
        assert!(matches!(
            fit_polynomial(&matches, 1, 1e-10),
            Err(TransformError::InsufficientData { required: 3, provided: 2 })
        ));
    }

    fn landmarks() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1000.0, 0.0),
            Point::new(0.0, 1000.0),
            Point::new(1000.0, 1000.0),
            Point::new(500.0, 400.0),
            Point::new(200.0, 800.0),
            Point::new(750.0, 150.0),
        ]
    }

    #[test]
    fn test_thin_plate_spline_interpolates_landmarks() {
        let p = landmarks();
        let q: Vec<Point> = p
            .iter()
            .enumerate()
            .map(|(k, p)| Point::new(1.01 * p.x + 30.0 + (k % 3) as f64, 0.99 * p.y - 12.0 - (k % 2) as f64 * 2.5))
            .collect();
        let matches = PointMatches::new(p.clone(), q.clone()).unwrap();
        for with_affine in [true, false] {
            let tps = fit_thin_plate_spline(&matches, with_affine, 1e-12).unwrap();
            assert_eq!(tps.len(), p.len());
            assert_eq!(tps.offset().is_some(), with_affine);
            for (got, want) in tps.apply(&p).iter().zip(&q) {
                assert!(got.distance(want) < 1e-6, "{with_affine}: {got:?} != {want:?}");
            }
        }
    }

    #[test]
    fn test_thin_plate_spline_of_affine_data_has_no_kernel_part() {
        let p: Vec<Point> = landmarks().iter().map(|p| Point::new(p.x * 5.0 + 2000.0, p.y * 5.0)).collect();
        let am = AffineModel::new(1.01, -0.02, 0.03, 0.98, 250.0, -40.0);
        let matches = PointMatches::new(p.clone(), am.apply(&p)).unwrap();
        let tps = fit_thin_plate_spline(&matches, true, 1e-12).unwrap();
        assert!(tps.coefficients().iter().flatten().all(|c| c.abs() < 1e-12));
        let offset = tps.offset().unwrap();
        let want = [0.01, -0.02, 0.03, -0.02];
        for (got, want) in [offset.m00, offset.m01, offset.m10, offset.m11].iter().zip(want) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert!((offset.b0 - 250.0).abs() < 1e-6 && (offset.b1 + 40.0).abs() < 1e-6, "{offset:?}");
        let off_grid = Point::new(3100.0, 2700.0);
        assert!(tps.apply_point(off_grid).distance(&am.apply_point(off_grid)) < 1e-6);
    }

    #[test]
    fn test_thin_plate_spline_needs_non_collinear_points() {
        let p: Vec<Point> = (0..4).map(|i| Point::new(i as f64, i as f64)).collect();
        let matches = PointMatches::new(p.clone(), p).unwrap();
        assert!(matches!(
            fit_thin_plate_spline(&matches, true, 1e-10),
            Err(TransformError::InsufficientData { .. })
        ));
        let two = PointMatches::new(landmarks()[..2].to_vec(), landmarks()[..2].to_vec()).unwrap();
        assert!(matches!(
            fit_thin_plate_spline(&two, true, 1e-10),
            Err(TransformError::InsufficientData { required: 3, provided: 2 })
        ));
    }

    #[test]
    fn test_non_linear_recovers_quadratic_mapping() {
        let p: Vec<Point> = (0..25)
            .map(|k| Point::new((k % 5) as f64 * 500.0, (k / 5) as f64 * 400.0 + 3.5))
            .collect();
        let warp = |p: &Point| {
            Point::new(
                3.0 + 1.1 * p.x - 0.2 * p.y + 1e-4 * p.x * p.x,
                -7.0 + 0.05 * p.x + 0.97 * p.y - 2e-5 * p.x * p.y + 3e-5 * p.y * p.y,
            )
        };
        let q: Vec<Point> = p.iter().map(warp).collect();
        let matches = PointMatches::new(p.clone(), q.clone()).unwrap();
        let model = fit_non_linear(&matches, 2, 1e-12).unwrap();
        assert_eq!(model.length(), 6);
        assert_eq!(model.size(), (2000, 1604));
        assert_eq!(model.norm_mean()[5], CONSTANT_FEATURE);
        for (got, want) in model.apply(&p).iter().zip(&q) {
            assert!(got.distance(want) < 1e-6, "{got:?} != {want:?}");
        }
        let between = Point::new(1234.0, 777.0);
        assert!(model.apply_point(between).distance(&warp(&between)) < 1e-6);
    }

    #[test]
    fn test_non_linear_needs_enough_varied_points() {
        let p = landmarks()[..5].to_vec();
        let matches = PointMatches::new(p.clone(), p).unwrap();
        assert!(matches!(
            fit_non_linear(&matches, 2, 1e-10),
            Err(TransformError::InsufficientData { required: 6, provided: 5 })
        ));
        // x never varies
        let column: Vec<Point> = (0..6).map(|i| Point::new(10.0, i as f64 * 3.0)).collect();
        let matches = PointMatches::new(column.clone(), column).unwrap();
        assert!(matches!(
            fit_non_linear(&matches, 1, 1e-10),
            Err(TransformError::InsufficientData { required: 3, .. })
        ));
    }

    #[test]
    fn test_similarity_needs_distinct_points() {
        let p = vec![Point::new(5.0, 5.0); 3];
        let matches = PointMatches::new(p.clone(), p).unwrap();
        assert!(matches!(
            fit_similarity(&matches, true),
            Err(TransformError::InsufficientData { .. })
        ));
    }
}
