//! Tile specs and resolved tile collections.
//!
//! Only the fields this crate computes with are typed; everything else a tile
//! spec carries (mipmap levels, layout, intensity range, filters) is kept
//! verbatim so that a decode-modify-encode cycle loses nothing.

use crate::error::TransformResult;
use crate::geometry::Bounds;
use crate::transform::{
    resolve, world_bounds, ReferenceTable, ResolvedChain, Transform, TransformList,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSpec {
    pub tile_id: String,
    pub z: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_y: Option<f64>,
    #[serde(default)]
    pub transforms: TransformList,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TileSpec {
    pub fn new(tile_id: impl Into<String>, z: f64, width: f64, height: f64) -> Self {
        Self {
            tile_id: tile_id.into(),
            z,
            width,
            height,
            min_x: None,
            min_y: None,
            max_x: None,
            max_y: None,
            transforms: TransformList::default(),
            extra: Map::new(),
        }
    }

    /// Pixel extent in local coordinates.
    pub fn local_bounds(&self) -> Bounds {
        Bounds::from_size(self.width, self.height)
    }

    /// Stored world bounds, if all four are present.
    pub fn bounds(&self) -> Option<Bounds> {
        Some(Bounds::new(self.min_x?, self.min_y?, self.max_x?, self.max_y?))
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.min_x = Some(bounds.min_x);
        self.min_y = Some(bounds.min_y);
        self.max_x = Some(bounds.max_x);
        self.max_y = Some(bounds.max_y);
    }

    pub fn resolve<'a>(&'a self, table: &'a ReferenceTable) -> TransformResult<ResolvedChain<'a>> {
        resolve(&self.transforms, table)
    }

    pub fn world_bounds(&self, table: &ReferenceTable, samples_per_edge: usize) -> TransformResult<Bounds> {
        let chain = self.resolve(table)?;
        world_bounds(&chain, self.width, self.height, samples_per_edge)
    }

    /// Recompute and store `minX`/`minY`/`maxX`/`maxY`.
    pub fn update_bounds(&mut self, table: &ReferenceTable, samples_per_edge: usize) -> TransformResult<Bounds> {
        let bounds = self.world_bounds(table, samples_per_edge)?;
        self.set_bounds(bounds);
        Ok(bounds)
    }
}

/// Tiles plus the shared transforms they reference, keyed by id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTiles {
    #[serde(default)]
    pub transform_id_to_spec_map: ReferenceTable,
    #[serde(default)]
    pub tile_id_to_spec_map: BTreeMap<String, TileSpec>,
}

impl ResolvedTiles {
    pub fn new(transforms: ReferenceTable, tiles: impl IntoIterator<Item = TileSpec>) -> Self {
        Self {
            transform_id_to_spec_map: transforms,
            tile_id_to_spec_map: tiles.into_iter().map(|t| (t.tile_id.clone(), t)).collect(),
        }
    }

    pub fn table(&self) -> &ReferenceTable {
        &self.transform_id_to_spec_map
    }

    pub fn tile(&self, tile_id: &str) -> Option<&TileSpec> {
        self.tile_id_to_spec_map.get(tile_id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileSpec> {
        self.tile_id_to_spec_map.values()
    }

    pub fn tile_count(&self) -> usize {
        self.tile_id_to_spec_map.len()
    }
}

/// List form of [`ResolvedTiles`] with explicit counts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTileCollection {
    pub tile_count: usize,
    pub tile_specs: Vec<TileSpec>,
    pub transform_count: usize,
    pub transform_specs: Vec<Transform>,
}

impl From<ResolvedTiles> for ResolvedTileCollection {
    /// Each shared transform is stamped with its table key as `id`, so the
    /// list form can be keyed again.
    fn from(resolved: ResolvedTiles) -> Self {
        let transform_specs: Vec<Transform> = resolved
            .transform_id_to_spec_map
            .into_iter()
            .map(|(id, mut transform)| {
                transform.set_id(id);
                transform
            })
            .collect();
        let tile_specs: Vec<TileSpec> = resolved.tile_id_to_spec_map.into_values().collect();
        Self {
            tile_count: tile_specs.len(),
            tile_specs,
            transform_count: transform_specs.len(),
            transform_specs,
        }
    }
}

impl From<ResolvedTileCollection> for ResolvedTiles {
    /// Shared transforms are keyed by their own `id`; anonymous ones are dropped.
    fn from(collection: ResolvedTileCollection) -> Self {
        ResolvedTiles::new(
            ReferenceTable::from_identified(collection.transform_specs),
            collection.tile_specs,
        )
    }
}
