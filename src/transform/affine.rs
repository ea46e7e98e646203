//! Affine-family leaf models: affine, translation, rigid and similarity.
//!
//! The non-affine members of the family are parameterised differently on the
//! wire but evaluate through their equivalent [`AffineModel`].

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a linear map is treated as singular.
pub const DEFAULT_SINGULAR_TOLERANCE: f64 = 1e-10;

/// 2-D affine map `x' = m00*x + m01*y + b0`, `y' = m10*x + m11*y + b1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineModel {
    pub m00: f64,
    pub m01: f64,
    pub m10: f64,
    pub m11: f64,
    pub b0: f64,
    pub b1: f64,
}

impl Default for AffineModel {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineModel {
    pub const fn new(m00: f64, m01: f64, m10: f64, m11: f64, b0: f64, b1: f64) -> Self {
        Self {
            m00,
            m01,
            m10,
            m11,
            b0,
            b1,
        }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Row-major 2x3 parameter matrix `[[m00, m01, b0], [m10, m11, b1]]`.
    pub fn matrix(&self) -> [[f64; 3]; 2] {
        [[self.m00, self.m01, self.b0], [self.m10, self.m11, self.b1]]
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.b0, self.b1)
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    #[inline]
    pub fn apply_point(&self, p: Point) -> Point {
        Point::new(
            self.m00 * p.x + self.m01 * p.y + self.b0,
            self.m10 * p.x + self.m11 * p.y + self.b1,
        )
    }

    pub fn apply(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply_point(*p)).collect()
    }

    /// Closed-form inverse; fails when `|det| < tolerance`.
    pub fn inverse(&self, tolerance: f64) -> TransformResult<AffineModel> {
        let det = self.determinant();
        if det.abs() < tolerance {
            return Err(TransformError::SingularTransform {
                determinant: det,
                tolerance,
            });
        }

        let i00 = self.m11 / det;
        let i01 = -self.m01 / det;
        let i10 = -self.m10 / det;
        let i11 = self.m00 / det;
        Ok(Self::new(
            i00,
            i01,
            i10,
            i11,
            -(i00 * self.b0 + i01 * self.b1),
            -(i10 * self.b0 + i11 * self.b1),
        ))
    }

    /// Composition `self ∘ other`: the result applies `other` first.
    pub fn concatenate(&self, other: &AffineModel) -> AffineModel {
        Self::new(
            self.m00 * other.m00 + self.m01 * other.m10,
            self.m00 * other.m01 + self.m01 * other.m11,
            self.m10 * other.m00 + self.m11 * other.m10,
            self.m10 * other.m01 + self.m11 * other.m11,
            self.m00 * other.b0 + self.m01 * other.b1 + self.b0,
            self.m10 * other.b0 + self.m11 * other.b1 + self.b1,
        )
    }

    /// Split the linear part into scale, shear and rotation.
    pub fn decompose(&self, axis: ShearAxis) -> Decomposition {
        decompose_linear([[self.m00, self.m01], [self.m10, self.m11]], axis)
    }
}

/// Axis that absorbs shear when decomposing a linear map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShearAxis {
    #[default]
    X,
    Y,
}

/// First-order properties of a 2x2 linear map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub scale_x: f64,
    pub scale_y: f64,
    pub shear: f64,
    /// Counter-clockwise rotation in radians.
    pub rotation: f64,
}

pub(crate) fn decompose_linear(m: [[f64; 2]; 2], axis: ShearAxis) -> Decomposition {
    match axis {
        ShearAxis::X => {
            let scale_y = m[1][0].hypot(m[1][1]);
            let theta = m[1][0].atan2(m[1][1]);
            let (rs, rc) = theta.sin_cos();
            let scale_x = rc * m[0][0] - rs * m[0][1];
            let shear = if rs != 0.0 {
                (m[0][0] - scale_x * rc) / (scale_x * rs)
            } else {
                (m[0][1] - scale_x * rs) / (scale_x * rc)
            };
            Decomposition {
                scale_x,
                scale_y,
                shear,
                rotation: theta,
            }
        }
        ShearAxis::Y => {
            let scale_x = m[0][0].hypot(m[0][1]);
            let theta = (-m[0][1]).atan2(m[0][0]);
            let (rs, rc) = theta.sin_cos();
            let scale_y = rs * m[1][0] + rc * m[1][1];
            let shear = if rs != 0.0 {
                (m[1][1] - scale_y * rc) / (-scale_y * rs)
            } else {
                (m[1][0] - scale_y * rs) / (scale_y * rc)
            };
            Decomposition {
                scale_x,
                scale_y,
                shear,
                rotation: theta,
            }
        }
    }
}

/// Pure translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TranslationModel {
    pub tx: f64,
    pub ty: f64,
}

impl TranslationModel {
    pub const fn new(tx: f64, ty: f64) -> Self {
        Self { tx, ty }
    }

    pub fn to_affine(&self) -> AffineModel {
        AffineModel::new(1.0, 0.0, 0.0, 1.0, self.tx, self.ty)
    }

    pub fn inverse(&self) -> TranslationModel {
        Self::new(-self.tx, -self.ty)
    }
}

/// Rotation by `theta` (radians, counter-clockwise) followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidModel {
    pub theta: f64,
    pub tx: f64,
    pub ty: f64,
}

impl RigidModel {
    pub const fn new(theta: f64, tx: f64, ty: f64) -> Self {
        Self { theta, tx, ty }
    }

    pub fn to_affine(&self) -> AffineModel {
        SimilarityModel::new(1.0, self.theta, self.tx, self.ty).to_affine()
    }

    pub fn inverse(&self) -> RigidModel {
        let (s, c) = self.theta.sin_cos();
        // R(-theta) * -t
        Self::new(
            -self.theta,
            -(c * self.tx + s * self.ty),
            -(-s * self.tx + c * self.ty),
        )
    }
}

/// Uniform scale and rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityModel {
    pub scale: f64,
    pub theta: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for SimilarityModel {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

impl SimilarityModel {
    pub const fn new(scale: f64, theta: f64, tx: f64, ty: f64) -> Self {
        Self {
            scale,
            theta,
            tx,
            ty,
        }
    }

    pub fn to_affine(&self) -> AffineModel {
        let (s, c) = self.theta.sin_cos();
        AffineModel::new(
            self.scale * c,
            -self.scale * s,
            self.scale * s,
            self.scale * c,
            self.tx,
            self.ty,
        )
    }

    pub fn inverse(&self, tolerance: f64) -> TransformResult<SimilarityModel> {
        let det = self.scale * self.scale;
        if det.abs() < tolerance {
            return Err(TransformError::SingularTransform {
                determinant: det,
                tolerance,
            });
        }
        let inv_scale = 1.0 / self.scale;
        let (s, c) = self.theta.sin_cos();
        Ok(Self::new(
            inv_scale,
            -self.theta,
            -inv_scale * (c * self.tx + s * self.ty),
            -inv_scale * (-s * self.tx + c * self.ty),
        ))
    }
}
