//! Transform model: leaf models plus the structural reference, interpolated
//! and list kinds used by render tile specs.

pub mod affine;
pub mod codec;
pub mod list;
pub mod nonlinear;
pub mod polynomial;
pub mod thin_plate_spline;

pub use affine::{
    AffineModel, Decomposition, RigidModel, ShearAxis, SimilarityModel, TranslationModel,
    DEFAULT_SINGULAR_TOLERANCE,
};
pub use list::{
    map_points, map_points_with_tolerance, resolve, world_bounds, Direction, ReferenceTable,
    ResolvedChain, Step, TransformList,
};
pub use nonlinear::NonLinearModel;
pub use polynomial::Polynomial2D;
pub use thin_plate_spline::{IterativeInverse, ThinPlateSpline};

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// Service class names that evaluate through [`NonLinearModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonLinearClass {
    NonLinearCoordinateTransform,
    NonLinearTransform,
    LensCorrection,
}

/// A leaf model whose service class is known but whose math is not evaluated
/// here, such as a thin-plate spline over more than two dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueModel {
    pub class_name: String,
    pub data_string: String,
}

/// Parameterised leaf models.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafModel {
    Affine(AffineModel),
    Translation(TranslationModel),
    Rigid(RigidModel),
    Similarity(SimilarityModel),
    Polynomial(Polynomial2D),
    NonLinear {
        class: NonLinearClass,
        model: NonLinearModel,
    },
    ThinPlateSpline(ThinPlateSpline),
    Opaque(OpaqueModel),
}

impl LeafModel {
    /// Short human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Affine(_) => "Affine".to_string(),
            Self::Translation(_) => "Translation".to_string(),
            Self::Rigid(_) => "Rigid".to_string(),
            Self::Similarity(_) => "Similarity".to_string(),
            Self::Polynomial(p) => format!("Polynomial2D(order {})", p.order()),
            Self::NonLinear { model, .. } => format!("NonLinear(dimension {})", model.dimension()),
            Self::ThinPlateSpline(t) => format!("ThinPlateSpline({} landmarks)", t.len()),
            Self::Opaque(o) => format!("Opaque({})", o.class_name),
        }
    }

    /// Affine form of the affine-family models.
    pub fn as_affine(&self) -> Option<AffineModel> {
        match self {
            Self::Affine(a) => Some(*a),
            Self::Translation(t) => Some(t.to_affine()),
            Self::Rigid(r) => Some(r.to_affine()),
            Self::Similarity(s) => Some(s.to_affine()),
            _ => None,
        }
    }

    pub fn apply(&self, points: &[Point]) -> TransformResult<Vec<Point>> {
        match self {
            Self::Polynomial(p) => Ok(p.apply(points)),
            Self::NonLinear { model, .. } => Ok(model.apply(points)),
            Self::ThinPlateSpline(t) => Ok(t.apply(points)),
            Self::Opaque(_) => Err(TransformError::unsupported("apply", self.describe())),
            other => match other.as_affine() {
                Some(affine) => Ok(affine.apply(points)),
                None => Err(TransformError::unsupported("apply", other.describe())),
            },
        }
    }

    /// Closed-form inverse for the affine family; thin-plate splines are
    /// inverted iteratively with [`IterativeInverse::default`].
    pub fn invert(&self, points: &[Point], tolerance: f64) -> TransformResult<Vec<Point>> {
        let inverse = match self {
            Self::Affine(a) => a.inverse(tolerance)?,
            Self::Translation(t) => t.inverse().to_affine(),
            Self::Rigid(r) => r.inverse().to_affine(),
            Self::Similarity(s) => s.inverse(tolerance)?.to_affine(),
            Self::Polynomial(p) => match p.to_affine() {
                Some(affine) if p.order() == 1 => affine.inverse(tolerance)?,
                _ => return Err(TransformError::unsupported("invert", self.describe())),
            },
            Self::ThinPlateSpline(t) => return t.invert(points, &IterativeInverse::default()),
            Self::NonLinear { .. } | Self::Opaque(_) => {
                return Err(TransformError::unsupported("invert", self.describe()))
            }
        };
        Ok(inverse.apply(points))
    }
}

/// A leaf model with its optional id and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafTransform {
    pub model: LeafModel,
    pub id: Option<String>,
    pub labels: Option<Vec<String>>,
}

impl LeafTransform {
    pub fn new(model: LeafModel) -> Self {
        Self {
            model,
            id: None,
            labels: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }
}

/// Named pointer into a shared transform table. Owns no parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTransform {
    pub ref_id: String,
    pub id: Option<String>,
}

/// Linear blend `(1 - lambda) * a(p) + lambda * b(p)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedTransform {
    pub a: Box<Transform>,
    pub b: Box<Transform>,
    pub lambda: f64,
    pub id: Option<String>,
}

impl InterpolatedTransform {
    pub fn new(a: Transform, b: Transform, lambda: f64) -> Self {
        Self {
            a: Box::new(a),
            b: Box::new(b),
            lambda,
            id: None,
        }
    }
}

/// Pointwise `(1 - lambda) * a + lambda * b`.
pub(crate) fn blend(a: &[Point], b: &[Point], lambda: f64) -> Vec<Point> {
    a.iter()
        .zip(b)
        .map(|(pa, pb)| {
            Point::new(
                (1.0 - lambda) * pa.x + lambda * pb.x,
                (1.0 - lambda) * pa.y + lambda * pb.y,
            )
        })
        .collect()
}

/// Any transform that may appear in a tile's transform list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::transform::codec::RawTransform", into = "crate::transform::codec::RawTransform")]
pub enum Transform {
    Leaf(LeafTransform),
    Reference(ReferenceTransform),
    Interpolated(InterpolatedTransform),
    List(TransformList),
}

impl From<LeafModel> for Transform {
    fn from(model: LeafModel) -> Self {
        Self::Leaf(LeafTransform::new(model))
    }
}

impl From<AffineModel> for Transform {
    fn from(model: AffineModel) -> Self {
        LeafModel::Affine(model).into()
    }
}

impl From<Polynomial2D> for Transform {
    fn from(model: Polynomial2D) -> Self {
        LeafModel::Polynomial(model).into()
    }
}

impl From<TransformList> for Transform {
    fn from(list: TransformList) -> Self {
        Self::List(list)
    }
}

impl Transform {
    pub fn reference(ref_id: impl Into<String>) -> Self {
        Self::Reference(ReferenceTransform {
            ref_id: ref_id.into(),
            id: None,
        })
    }

    pub fn interpolated(a: Transform, b: Transform, lambda: f64) -> Self {
        Self::Interpolated(InterpolatedTransform::new(a, b, lambda))
    }

    /// Id under which this transform can be stored in a shared table.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Leaf(leaf) => leaf.id.as_deref(),
            Self::Reference(r) => r.id.as_deref(),
            Self::Interpolated(i) => i.id.as_deref(),
            Self::List(list) => list.id.as_deref(),
        }
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = Some(id.into());
        match self {
            Self::Leaf(leaf) => leaf.id = id,
            Self::Reference(r) => r.id = id,
            Self::Interpolated(i) => i.id = id,
            Self::List(list) => list.id = id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Leaf(leaf) => leaf.model.describe(),
            Self::Reference(r) => format!("Reference({})", r.ref_id),
            Self::Interpolated(_) => "Interpolated".to_string(),
            Self::List(list) => format!("List({} transforms)", list.len()),
        }
    }

    /// True when this transform is, or contains, a reference.
    pub fn contains_reference(&self) -> bool {
        match self {
            Self::Leaf(_) => false,
            Self::Reference(_) => true,
            Self::Interpolated(i) => i.a.contains_reference() || i.b.contains_reference(),
            Self::List(list) => list.iter().any(Transform::contains_reference),
        }
    }

    /// Forward mapping. References must be resolved first.
    pub fn apply(&self, points: &[Point]) -> TransformResult<Vec<Point>> {
        match self {
            Self::Leaf(leaf) => leaf.model.apply(points),
            Self::Reference(_) => Err(TransformError::unsupported("apply", self.describe())),
            Self::Interpolated(i) => {
                let a = i.a.apply(points)?;
                let b = i.b.apply(points)?;
                Ok(blend(&a, &b, i.lambda))
            }
            Self::List(list) => list.iter().enumerate().try_fold(points.to_vec(), |pts, (k, t)| {
                t.apply(&pts).map_err(|e| e.at_index(k))
            }),
        }
    }

    /// Inverse mapping with the default singular tolerance.
    pub fn invert(&self, points: &[Point]) -> TransformResult<Vec<Point>> {
        self.invert_with_tolerance(points, DEFAULT_SINGULAR_TOLERANCE)
    }

    pub fn invert_with_tolerance(&self, points: &[Point], tolerance: f64) -> TransformResult<Vec<Point>> {
        match self {
            Self::Leaf(leaf) => leaf.model.invert(points, tolerance),
            Self::Reference(_) | Self::Interpolated(_) => {
                Err(TransformError::unsupported("invert", self.describe()))
            }
            Self::List(list) => list
                .iter()
                .enumerate()
                .rev()
                .try_fold(points.to_vec(), |pts, (k, t)| {
                    t.invert_with_tolerance(&pts, tolerance)
                        .map_err(|e| e.at_index(k))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_cannot_be_applied() {
        let r = Transform::reference("shared-lens");
        let err = r.apply(&[Point::new(1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedOperation { operation: "apply", .. }));
        assert!(r.contains_reference());
    }

    #[test]
    fn test_interpolated_blends_outputs() {
        let a = Transform::from(AffineModel::identity());
        let b = Transform::from(TranslationModel::new(10.0, -4.0).to_affine());
        let t = Transform::interpolated(a, b, 0.25);
        let out = t.apply(&[Point::new(1.0, 1.0)]).unwrap();
        assert_eq!(out, vec![Point::new(3.5, 0.0)]);
        assert!(t.invert(&out).is_err());
    }

    #[test]
    fn test_polynomial_order_two_has_no_inverse() {
        let quad = Polynomial2D::identity().as_order(2).unwrap();
        let err = Transform::from(quad).invert(&[Point::new(0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_linear_polynomial_inverts() {
        let am = AffineModel::new(2.0, 0.0, 0.0, 0.5, 3.0, 1.0);
        let t = Transform::from(Polynomial2D::from_affine(&am));
        let p = Point::new(7.0, -2.0);
        let q = t.apply(&[p]).unwrap();
        let back = t.invert(&q).unwrap();
        assert!(back[0].distance(&p) < 1e-12);
    }

    #[test]
    fn test_set_id_covers_every_kind() {
        let mut kinds = vec![
            Transform::from(AffineModel::identity()),
            Transform::reference("lens"),
            Transform::interpolated(AffineModel::identity().into(), AffineModel::identity().into(), 0.5),
            Transform::List(TransformList::default()),
        ];
        for t in &mut kinds {
            assert_eq!(t.id(), None);
            t.set_id("shared");
            assert_eq!(t.id(), Some("shared"));
        }
    }

    #[test]
    fn test_opaque_reports_class() {
        let t = Transform::from(LeafModel::Opaque(OpaqueModel {
            class_name: "mpicbg.trakem2.transform.ThinPlateSplineTransform".to_string(),
            data_string: "ThinPlateSplineR2LogR 3 4 null AAAA".to_string(),
        }));
        let err = t.apply(&[Point::new(0.0, 0.0)]).unwrap_err();
        assert!(err.to_string().contains("ThinPlateSpline"));
    }
}
