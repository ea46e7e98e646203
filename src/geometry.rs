use serde::{Deserialize, Serialize};

/// A 2-D coordinate in double precision.
///
/// Serialized as a two-element array `[x, y]`, the way the render service
/// exchanges coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Pixel extent of a tile in its local coordinates.
    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    /// Smallest box containing every point, `None` for an empty slice.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let init = Self::new(first.x, first.y, first.x, first.y);
        Some(points.iter().skip(1).fold(init, |b, p| Self {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Regularly spaced sample points covering `bounds`, edges included.
///
/// `nx` and `ny` are the number of samples along each axis; values below 2
/// are raised to 2 so the corners are always present.
pub fn regular_grid(bounds: &Bounds, nx: usize, ny: usize) -> Vec<Point> {
    let nx = nx.max(2);
    let ny = ny.max(2);
    let dx = bounds.width() / (nx - 1) as f64;
    let dy = bounds.height() / (ny - 1) as f64;

    let mut points = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            points.push(Point::new(
                bounds.min_x + i as f64 * dx,
                bounds.min_y + j as f64 * dy,
            ));
        }
    }
    points
}

/// Points along the outline of `bounds`, `samples_per_edge` per side
/// (corners included once).
pub fn outline(bounds: &Bounds, samples_per_edge: usize) -> Vec<Point> {
    let n = samples_per_edge.max(2);
    let step = |from: f64, to: f64, k: usize| from + (to - from) * k as f64 / (n - 1) as f64;

    let mut points = Vec::with_capacity(4 * (n - 1));
    for k in 0..n - 1 {
        points.push(Point::new(step(bounds.min_x, bounds.max_x, k), bounds.min_y));
    }
    for k in 0..n - 1 {
        points.push(Point::new(bounds.max_x, step(bounds.min_y, bounds.max_y, k)));
    }
    for k in 0..n - 1 {
        points.push(Point::new(step(bounds.max_x, bounds.min_x, k), bounds.max_y));
    }
    for k in 0..n - 1 {
        points.push(Point::new(bounds.min_x, step(bounds.max_y, bounds.min_y, k)));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_serializes_as_pair() {
        let p = Point::new(1.5, -2.0);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[1.5,-2.0]");
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_regular_grid_covers_corners() {
        let grid = regular_grid(&Bounds::from_size(100.0, 50.0), 3, 2);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], Point::new(0.0, 0.0));
        assert_eq!(grid[2], Point::new(100.0, 0.0));
        assert_eq!(grid[5], Point::new(100.0, 50.0));
    }

    #[test]
    fn test_outline_visits_each_corner_once() {
        let pts = outline(&Bounds::from_size(10.0, 10.0), 3);
        assert_eq!(pts.len(), 8);
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        for c in corners {
            assert_eq!(pts.iter().filter(|p| **p == c).count(), 1);
        }
    }

    #[test]
    fn test_enclosing_bounds() {
        assert!(Bounds::enclosing(&[]).is_none());
        let b = Bounds::enclosing(&[Point::new(3.0, -1.0), Point::new(-2.0, 4.0)]).unwrap();
        assert_eq!(b, Bounds::new(-2.0, -1.0, 3.0, 4.0));
    }
}
