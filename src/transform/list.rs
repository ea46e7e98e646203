//! Ordered transform chains and their resolution against a shared table.

use crate::error::{TransformError, TransformResult};
use crate::geometry::{outline, Bounds, Point};
use crate::transform::{blend, AffineModel, LeafTransform, Transform, DEFAULT_SINGULAR_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered sequence of transforms applied left to right.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "crate::transform::codec::RawTransform", into = "crate::transform::codec::RawTransform")]
pub struct TransformList {
    pub id: Option<String>,
    transforms: Vec<Transform>,
}

impl TransformList {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self {
            id: None,
            transforms,
        }
    }

    pub fn with_id(transforms: Vec<Transform>, id: Option<String>) -> Self {
        Self { id, transforms }
    }

    pub fn push(&mut self, transform: impl Into<Transform>) {
        self.transforms.push(transform.into());
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transform> {
        self.transforms.iter()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn into_parts(self) -> (Option<String>, Vec<Transform>) {
        (self.id, self.transforms)
    }
}

impl FromIterator<Transform> for TransformList {
    fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TransformList {
    type Item = &'a Transform;
    type IntoIter = std::slice::Iter<'a, Transform>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Shared transforms keyed by id, as delivered in `transformIdToSpecMap`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceTable {
    entries: BTreeMap<String, Transform>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, transform: Transform) -> Option<Transform> {
        self.entries.insert(id.into(), transform)
    }

    pub fn get(&self, id: &str) -> Option<&Transform> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Build a table from transforms that carry their own id; anonymous ones are skipped.
    pub fn from_identified<I: IntoIterator<Item = Transform>>(transforms: I) -> Self {
        transforms
            .into_iter()
            .filter_map(|t| t.id().map(str::to_string).map(|id| (id, t)))
            .collect()
    }
}

impl IntoIterator for ReferenceTable {
    type Item = (String, Transform);
    type IntoIter = std::collections::btree_map::IntoIter<String, Transform>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Transform)> for ReferenceTable {
    fn from_iter<I: IntoIterator<Item = (String, Transform)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A concrete step of a resolved chain. Borrows from the list or the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<'a> {
    Leaf(&'a LeafTransform),
    Interpolated {
        a: ResolvedChain<'a>,
        b: ResolvedChain<'a>,
        lambda: f64,
    },
}

impl Step<'_> {
    pub fn describe(&self) -> String {
        match self {
            Step::Leaf(leaf) => leaf.model.describe(),
            Step::Interpolated { lambda, .. } => format!("Interpolated(lambda {lambda})"),
        }
    }

    pub fn apply(&self, points: &[Point]) -> TransformResult<Vec<Point>> {
        match self {
            Step::Leaf(leaf) => leaf.model.apply(points),
            Step::Interpolated { a, b, lambda } => {
                let pa = a.apply(points)?;
                let pb = b.apply(points)?;
                Ok(blend(&pa, &pb, *lambda))
            }
        }
    }

    pub fn invert(&self, points: &[Point], tolerance: f64) -> TransformResult<Vec<Point>> {
        match self {
            Step::Leaf(leaf) => leaf.model.invert(points, tolerance),
            Step::Interpolated { .. } => Err(TransformError::unsupported("invert", self.describe())),
        }
    }

    fn to_transform(&self) -> Transform {
        match self {
            Step::Leaf(leaf) => Transform::Leaf((*leaf).clone()),
            Step::Interpolated { a, b, lambda } => {
                Transform::interpolated(a.to_transform(), b.to_transform(), *lambda)
            }
        }
    }

    fn as_affine(&self) -> Option<AffineModel> {
        match self {
            Step::Leaf(leaf) => leaf.model.as_affine(),
            Step::Interpolated { .. } => None,
        }
    }
}

/// Flat sequence of concrete steps with every reference substituted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedChain<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> ResolvedChain<'a> {
    pub fn steps(&self) -> &[Step<'a>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, points: &[Point]) -> TransformResult<Vec<Point>> {
        self.steps
            .iter()
            .enumerate()
            .try_fold(points.to_vec(), |pts, (k, step)| {
                tracing::trace!(step = k, kind = %step.describe(), points = pts.len(), "forward step");
                step.apply(&pts).map_err(|e| e.at_index(k))
            })
    }

    pub fn invert(&self, points: &[Point], tolerance: f64) -> TransformResult<Vec<Point>> {
        self.steps
            .iter()
            .enumerate()
            .rev()
            .try_fold(points.to_vec(), |pts, (k, step)| {
                tracing::trace!(step = k, kind = %step.describe(), points = pts.len(), "inverse step");
                step.invert(&pts, tolerance).map_err(|e| e.at_index(k))
            })
    }

    /// True when every step is an affine, translation, rigid or similarity leaf.
    pub fn is_affine_family(&self) -> bool {
        self.steps.iter().all(|s| s.as_affine().is_some())
    }

    /// Owned list of the concrete steps, with references inlined.
    pub fn to_list(&self) -> TransformList {
        self.steps.iter().map(Step::to_transform).collect()
    }

    fn to_transform(&self) -> Transform {
        match self.steps.as_slice() {
            [single] => single.to_transform(),
            _ => Transform::List(self.to_list()),
        }
    }

    /// Product of the chain as one affine map, `None` unless [`Self::is_affine_family`].
    pub fn affine_product(&self) -> Option<AffineModel> {
        self.steps
            .iter()
            .try_fold(AffineModel::identity(), |acc, step| {
                step.as_affine().map(|a| a.concatenate(&acc))
            })
    }
}

fn push_steps<'a>(
    transform: &'a Transform,
    table: Option<&'a ReferenceTable>,
    steps: &mut Vec<Step<'a>>,
) -> TransformResult<()> {
    match transform {
        Transform::Leaf(leaf) => steps.push(Step::Leaf(leaf)),
        Transform::Reference(r) => {
            let target = table
                .and_then(|t| t.get(&r.ref_id))
                .filter(|target| !target.contains_reference())
                .ok_or_else(|| TransformError::UnresolvedReference {
                    ref_id: r.ref_id.clone(),
                })?;
            push_steps(target, None, steps)?;
        }
        Transform::Interpolated(i) => {
            let mut a = Vec::new();
            let mut b = Vec::new();
            push_steps(&i.a, table, &mut a)?;
            push_steps(&i.b, table, &mut b)?;
            steps.push(Step::Interpolated {
                a: ResolvedChain { steps: a },
                b: ResolvedChain { steps: b },
                lambda: i.lambda,
            });
        }
        Transform::List(list) => {
            for t in list {
                push_steps(t, table, steps)?;
            }
        }
    }
    Ok(())
}

/// Substitute every reference in `list` with its entry in `table`.
///
/// Nested lists are flattened. A reference whose target is itself a
/// reference (or contains one) is reported as unresolved. Errors carry the
/// position of the offending entry in `list`.
pub fn resolve<'a>(list: &'a TransformList, table: &'a ReferenceTable) -> TransformResult<ResolvedChain<'a>> {
    let mut steps = Vec::with_capacity(list.len());
    for (k, transform) in list.iter().enumerate() {
        push_steps(transform, Some(table), &mut steps).map_err(|e| e.at_index(k))?;
    }
    tracing::trace!(entries = list.len(), steps = steps.len(), "resolved transform list");
    Ok(ResolvedChain { steps })
}

/// Direction of traversal for [`map_points`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// List order, each step's forward mapping.
    #[default]
    Forward,
    /// Reverse list order, each step's inverse.
    Inverse,
}

pub fn map_points(chain: &ResolvedChain<'_>, points: &[Point], direction: Direction) -> TransformResult<Vec<Point>> {
    map_points_with_tolerance(chain, points, direction, DEFAULT_SINGULAR_TOLERANCE)
}

pub fn map_points_with_tolerance(
    chain: &ResolvedChain<'_>,
    points: &[Point],
    direction: Direction,
    tolerance: f64,
) -> TransformResult<Vec<Point>> {
    match direction {
        Direction::Forward => chain.apply(points),
        Direction::Inverse => chain.invert(points, tolerance),
    }
}

/// World-space bounding box of a `width` x `height` tile.
///
/// The tile outline is sampled with `samples_per_edge` points per side, so
/// curved edges of non-linear chains are approximated from inside.
pub fn world_bounds(
    chain: &ResolvedChain<'_>,
    width: f64,
    height: f64,
    samples_per_edge: usize,
) -> TransformResult<Bounds> {
    let local = outline(&Bounds::from_size(width, height), samples_per_edge);
    let world = chain.apply(&local)?;
    Bounds::enclosing(&world).ok_or(TransformError::InsufficientData {
        required: 1,
        provided: 0,
    })
}
