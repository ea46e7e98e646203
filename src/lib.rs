pub mod config;
pub mod error;
pub mod estimate;
pub mod geometry;
pub mod logging;
pub mod tilespec;
pub mod transform;

pub use error::TransformError;
pub use estimate::{
    approximate_as_polynomial, collapse, estimate, Estimator, Fit, ModelKind, PointMatches,
    Residuals,
};
pub use geometry::{regular_grid, Bounds, Point};
pub use tilespec::{ResolvedTileCollection, ResolvedTiles, TileSpec};
pub use transform::{
    map_points, resolve, world_bounds, AffineModel, Direction, LeafModel, Polynomial2D,
    ReferenceTable, ResolvedChain, Transform, TransformList,
};

pub type Result<T> = std::result::Result<T, TransformError>;
