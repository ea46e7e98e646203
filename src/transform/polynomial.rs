use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use crate::transform::affine::{decompose_linear, AffineModel, Decomposition, ShearAxis};

/// Number of monomials in a full bivariate polynomial of total degree `order`.
///
/// Saturates for orders whose count does not fit in `usize`.
pub const fn coefficient_count(order: usize) -> usize {
    order.saturating_add(1).saturating_mul(order.saturating_add(2)) / 2
}

/// [`coefficient_count`], or `None` when it overflows.
pub fn checked_coefficient_count(order: usize) -> Option<usize> {
    let n = order.checked_add(1)?.checked_mul(order.checked_add(2)?)?;
    Some(n / 2)
}

/// Inverse of [`coefficient_count`]; `None` when `count` is not triangular.
pub fn order_for_count(count: usize) -> Option<usize> {
    (0..)
        .map_while(|order| checked_coefficient_count(order).map(|c| (order, c)))
        .take_while(|(_, c)| *c <= count)
        .find(|(_, c)| *c == count)
        .map(|(order, _)| order)
}

/// Monomials `x^(j-i) * y^i` for `j = 0..=order`, `i = 0..=j`, in coefficient order.
pub(crate) fn monomials(p: Point, order: usize) -> Vec<f64> {
    let mut terms = Vec::with_capacity(coefficient_count(order));
    for j in 0..=order {
        for i in 0..=j {
            terms.push(p.x.powi((j - i) as i32) * p.y.powi(i as i32));
        }
    }
    terms
}

/// Bivariate polynomial map with one coefficient row per output coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial2D {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Polynomial2D {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> TransformResult<Self> {
        if x.len() != y.len() {
            return Err(TransformError::malformed(format!(
                "polynomial rows differ in length: {} x coefficients, {} y coefficients",
                x.len(),
                y.len()
            )));
        }
        if order_for_count(x.len()).is_none() {
            return Err(TransformError::malformed(format!(
                "{} coefficients per coordinate do not form a complete polynomial",
                x.len()
            )));
        }
        Ok(Self { x, y })
    }

    /// Degree-1 identity.
    pub fn identity() -> Self {
        Self {
            x: vec![0.0, 1.0, 0.0],
            y: vec![0.0, 0.0, 1.0],
        }
    }

    pub fn from_affine(affine: &AffineModel) -> Self {
        Self {
            x: vec![affine.b0, affine.m00, affine.m01],
            y: vec![affine.b1, affine.m10, affine.m11],
        }
    }

    pub fn x_coefficients(&self) -> &[f64] {
        &self.x
    }

    pub fn y_coefficients(&self) -> &[f64] {
        &self.y
    }

    pub fn order(&self) -> usize {
        // validated in the constructor
        order_for_count(self.x.len()).unwrap_or(0)
    }

    pub fn apply_point(&self, p: Point) -> Point {
        let terms = monomials(p, self.order());
        let dot = |coeffs: &[f64]| coeffs.iter().zip(&terms).map(|(c, t)| c * t).sum::<f64>();
        Point::new(dot(&self.x), dot(&self.y))
    }

    pub fn apply(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply_point(*p)).collect()
    }

    /// Same mapping expressed with `order` coefficients (zero padded).
    pub fn as_order(&self, order: usize) -> TransformResult<Polynomial2D> {
        let current = self.order();
        if order < current {
            return Err(TransformError::unsupported(
                "lowering polynomial order",
                format!("Polynomial2D(order {current}) -> order {order}"),
            ));
        }
        let count = checked_coefficient_count(order).ok_or_else(|| {
            TransformError::malformed(format!("polynomial order {order} is too large"))
        })?;
        let mut x = self.x.clone();
        let mut y = self.y.clone();
        x.resize(count, 0.0);
        y.resize(count, 0.0);
        Ok(Self { x, y })
    }

    /// Equivalent affine map for polynomials of order 0 or 1.
    pub fn to_affine(&self) -> Option<AffineModel> {
        let c = |row: &[f64], k: usize| row.get(k).copied().unwrap_or(0.0);
        match self.order() {
            0 | 1 => Some(AffineModel::new(
                c(&self.x, 1),
                c(&self.x, 2),
                c(&self.y, 1),
                c(&self.y, 2),
                c(&self.x, 0),
                c(&self.y, 0),
            )),
            _ => None,
        }
    }

    /// Scale, shear and rotation of the first-order terms; `None` for order 0.
    pub fn decompose(&self, axis: ShearAxis) -> Option<Decomposition> {
        if self.order() == 0 {
            return None;
        }
        Some(decompose_linear(
            [[self.x[1], self.x[2]], [self.y[1], self.y[2]]],
            axis,
        ))
    }

    /// Flattened parameters: x row followed by y row.
    pub fn parameters(&self) -> Vec<f64> {
        self.x.iter().chain(self.y.iter()).copied().collect()
    }

    pub fn from_parameters(params: &[f64]) -> TransformResult<Self> {
        if params.len() % 2 != 0 {
            return Err(TransformError::malformed(format!(
                "polynomial needs an even number of parameters, got {}",
                params.len()
            )));
        }
        let (x, y) = params.split_at(params.len() / 2);
        Self::new(x.to_vec(), y.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficient_counts() {
        assert_eq!(coefficient_count(0), 1);
        assert_eq!(coefficient_count(1), 3);
        assert_eq!(coefficient_count(2), 6);
        assert_eq!(order_for_count(10), Some(3));
        assert_eq!(order_for_count(4), None);
        assert_eq!(checked_coefficient_count(usize::MAX / 2), None);
        assert_eq!(coefficient_count(usize::MAX / 2), usize::MAX / 2);
    }

    #[test]
    fn test_decompose_ignores_higher_orders() {
        let am = AffineModel::new(0.0, -2.0, 2.0, 0.0, 10.0, 20.0);
        let mut params = Polynomial2D::from_affine(&am).as_order(2).unwrap().parameters();
        // x^2 and y^2 terms must not change the first-order properties
        params[3] = 1e-3;
        params[11] = -4e-4;
        let quad = Polynomial2D::from_parameters(&params).unwrap();
        for axis in [ShearAxis::X, ShearAxis::Y] {
            assert_eq!(quad.decompose(axis), Some(am.decompose(axis)));
        }
        assert_eq!(Polynomial2D::new(vec![1.0], vec![2.0]).unwrap().decompose(ShearAxis::X), None);
    }

    #[test]
    fn test_rejects_incomplete_rows() {
        assert!(matches!(
            Polynomial2D::new(vec![0.0; 4], vec![0.0; 4]),
            Err(TransformError::MalformedParameters(_))
        ));
        assert!(Polynomial2D::from_parameters(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_from_affine_layout() {
        let am = AffineModel::new(0.9, 0.3, -0.2, 0.85, 245.3, -234.1);
        let pt = Polynomial2D::from_affine(&am);
        assert_eq!(pt.order(), 1);
        assert_eq!(pt.parameters(), vec![245.3, 0.9, 0.3, -234.1, -0.2, 0.85]);
        assert_eq!(pt.to_affine(), Some(am));
    }

    #[test]
    fn test_as_order_keeps_mapping() {
        let low = Polynomial2D::identity();
        let high = low.as_order(3).unwrap();
        assert_eq!(high.order(), 3);
        let p = Point::new(12.5, -3.25);
        assert_eq!(low.apply_point(p), high.apply_point(p));
        assert!(high.as_order(2).is_err());
    }

    #[test]
    fn test_quadratic_evaluation() {
        // x' = x^2, y' = x*y
        let pt = Polynomial2D::new(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        )
        .unwrap();
        assert_eq!(pt.apply_point(Point::new(3.0, 2.0)), Point::new(9.0, 6.0));
    }
}
