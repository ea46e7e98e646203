use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use render_transform::transform::codec::decode_leaf;
use render_transform::transform::{RigidModel, SimilarityModel, TranslationModel};
use render_transform::*;

fn random_points(rng: &mut StdRng, n: usize) -> Vec<Point> {
    (0..n)
        .map(|_| Point::new(rng.gen_range(0.0..3840.0), rng.gen_range(0.0..3840.0)))
        .collect()
}

fn matches_for(p: Vec<Point>, map: impl Fn(Point) -> Point) -> PointMatches {
    let q = p.iter().map(|pt| map(*pt)).collect();
    PointMatches::new(p, q).unwrap()
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() < tolerance
}

#[test]
fn test_identity_example() {
    let corners = vec![
        Point::new(0.0, 0.0),
        Point::new(1000.0, 1000.0),
        Point::new(1000.0, 0.0),
        Point::new(0.0, 1000.0),
    ];
    let matches = PointMatches::new(corners.clone(), corners).unwrap();
    let fit = estimate(ModelKind::Affine, &matches).unwrap();
    let affine = fit.model.as_affine().unwrap();
    let expected = AffineModel::identity().matrix();
    for (row, want) in affine.matrix().iter().zip(expected.iter()) {
        for (g, w) in row.iter().zip(want) {
            assert!(close(*g, *w, 1e-9));
        }
    }
    assert!(fit.residuals.rms < 1e-9);
}

#[test]
fn test_affine_recovery() {
    let mut rng = StdRng::seed_from_u64(2024);
    let truth = AffineModel::new(0.97, -0.031, 0.027, 1.012, 1843.2, -912.7);
    for n in [3, 10, 200] {
        let matches = matches_for(random_points(&mut rng, n), |p| truth.apply_point(p));
        let fit = AffineModel::estimate(&matches).unwrap();
        for (g, w) in fit.model.matrix().iter().flatten().zip(truth.matrix().iter().flatten()) {
            assert!(close(*g, *w, 1e-9), "n={n}: {g} vs {w}");
        }
        assert!(fit.residuals.rms < 1e-8);
        assert_eq!(fit.residuals.count, n);
    }
}

#[test]
fn test_affine_needs_three_non_collinear_pairs() {
    let two = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
    let matches = PointMatches::new(two.clone(), two).unwrap();
    assert_eq!(
        AffineModel::estimate(&matches).unwrap_err(),
        TransformError::InsufficientData {
            required: 3,
            provided: 2
        }
    );

    let line: Vec<Point> = (0..10).map(|i| Point::new(i as f64 * 10.0, 5.0)).collect();
    let matches = PointMatches::new(line.clone(), line).unwrap();
    assert!(matches!(
        AffineModel::estimate(&matches),
        Err(TransformError::InsufficientData { required: 3, .. })
    ));
}

#[test]
fn test_similarity_rigid_translation_recovery() {
    let mut rng = StdRng::seed_from_u64(99);
    let p = random_points(&mut rng, 25);

    let sim = SimilarityModel::new(1.35, -0.4, 210.0, -75.0);
    let fit = SimilarityModel::estimate(&matches_for(p.clone(), |x| sim.to_affine().apply_point(x))).unwrap();
    assert!(close(fit.model.scale, sim.scale, 1e-10));
    assert!(close(fit.model.theta, sim.theta, 1e-10));
    assert!(close(fit.model.tx, sim.tx, 1e-7));
    assert!(close(fit.model.ty, sim.ty, 1e-7));

    let rigid = RigidModel::new(2.9, -1000.0, 30.0);
    let fit = RigidModel::estimate(&matches_for(p.clone(), |x| rigid.to_affine().apply_point(x))).unwrap();
    assert!(close(fit.model.theta, rigid.theta, 1e-10));
    assert!(close(fit.model.tx, rigid.tx, 1e-7));
    assert!(fit.residuals.max < 1e-7);

    let shift = TranslationModel::new(0.5, -12.25);
    let fit = TranslationModel::estimate(&matches_for(p, |x| shift.to_affine().apply_point(x))).unwrap();
    assert!(close(fit.model.tx, 0.5, 1e-9));
    assert!(close(fit.model.ty, -12.25, 1e-9));
}

#[test]
fn test_rigid_ignores_scale() {
    let p = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(0.0, 10.0)];
    let scaled = SimilarityModel::new(2.0, 0.0, 0.0, 0.0).to_affine();
    let fit = RigidModel::estimate(&matches_for(p, |x| scaled.apply_point(x))).unwrap();
    assert!(close(fit.model.theta, 0.0, 1e-12));
    assert!(fit.residuals.rms > 1.0);
}

#[test]
fn test_polynomial_recovery_from_service_sample() {
    let sample = "67572.7356991 0.972637082773 -0.0266434803369 -3.08962731867E-06 3.52672451824E-06 1.36924119761E-07 \
                  5446.85340052 0.0224047626583 0.961202608454 -3.36753624487E-07 -8.97219078255E-07 -5.49854010072E-06";
    let truth = match decode_leaf("mpicbg.trakem2.transform.PolynomialTransform2D", sample).unwrap() {
        LeafModel::Polynomial(p) => p,
        other => panic!("unexpected {}", other.describe()),
    };

    let domain = regular_grid(&Bounds::from_size(3840.0, 3840.0), 8, 8);
    let matches = matches_for(domain, |p| truth.apply_point(p));
    let fit = Polynomial2D::estimate(&matches, 2).unwrap();
    assert!(fit.residuals.rms < 1e-6, "rms {}", fit.residuals.rms);

    let point = Point::new(1234.5, 2987.25);
    assert!(fit.model.apply_point(point).distance(&truth.apply_point(point)) < 1e-6);
    for (g, w) in fit.model.parameters().iter().zip(truth.parameters()) {
        assert!(close(*g, w, 1e-6 * w.abs().max(1e-3)), "{g} vs {w}");
    }
}

#[test]
fn test_polynomial_needs_enough_samples() {
    let p: Vec<Point> = (0..9).map(|i| Point::new(i as f64, (i * i) as f64)).collect();
    let matches = PointMatches::new(p.clone(), p).unwrap();
    assert_eq!(
        Polynomial2D::estimate(&matches, 3).unwrap_err(),
        TransformError::InsufficientData {
            required: 10,
            provided: 9
        }
    );
}

#[test]
fn test_zero_weight_outlier_is_ignored() {
    let mut rng = StdRng::seed_from_u64(5);
    let truth = AffineModel::new(1.01, 0.02, -0.015, 0.99, 50.0, 60.0);
    let p = random_points(&mut rng, 12);
    let mut q: Vec<Point> = p.iter().map(|x| truth.apply_point(*x)).collect();
    q[3] = Point::new(-9999.0, 9999.0);

    let mut weights = vec![1.0; p.len()];
    weights[3] = 0.0;
    let matches = PointMatches::new(p.clone(), q.clone()).unwrap().with_weights(weights).unwrap();
    let fit = AffineModel::estimate(&matches).unwrap();
    for (g, w) in fit.model.matrix().iter().flatten().zip(truth.matrix().iter().flatten()) {
        assert!(close(*g, *w, 1e-8));
    }
    // residuals stay unweighted, so the outlier shows up in max
    assert!(fit.residuals.max > 1000.0);

    let unweighted = AffineModel::estimate(&PointMatches::new(p, q).unwrap()).unwrap();
    assert!((unweighted.model.b0 - truth.b0).abs() > 1.0);
}

#[test]
fn test_weights_pull_the_fit() {
    // two inconsistent observations of a pure translation
    let p = vec![Point::new(0.0, 0.0), Point::new(0.0, 0.0)];
    let q = vec![Point::new(10.0, 0.0), Point::new(20.0, 0.0)];
    let matches = PointMatches::new(p, q).unwrap().with_weights(vec![3.0, 1.0]).unwrap();
    let fit = TranslationModel::estimate(&matches).unwrap();
    assert!(close(fit.model.tx, 12.5, 1e-12));
}

#[test]
fn test_estimator_dispatch_kinds() {
    let mut rng = StdRng::seed_from_u64(1);
    let truth = AffineModel::new(1.0, 0.0, 0.0, 1.0, 3.0, 4.0);
    let matches = matches_for(random_points(&mut rng, 12), |p| truth.apply_point(p));
    let estimator = Estimator::default();

    for kind in [
        ModelKind::Translation,
        ModelKind::Rigid,
        ModelKind::Similarity,
        ModelKind::Affine,
        ModelKind::Polynomial { degree: 1 },
        ModelKind::Polynomial { degree: 2 },
    ] {
        let fit = estimator.estimate(kind, &matches).unwrap();
        assert!(fit.residuals.rms < 1e-6, "{} rms {}", kind.name(), fit.residuals.rms);
        let moved = fit.model.apply(&[Point::new(0.0, 0.0)]).unwrap();
        assert!(moved[0].distance(&Point::new(3.0, 4.0)) < 1e-6);
    }
}
