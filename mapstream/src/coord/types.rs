//! Core coordinate types.

use serde::Deserialize;
use thiserror::Error;

/// Errors for invalid tile coordinates or layer lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Layer index outside the configured layer set.
    #[error("invalid layer index {0}")]
    InvalidLayer(u8),

    /// Tile origin not aligned to the layer's tile grid.
    #[error("origin ({lon}, {lat}) not aligned to tile size {tile_size}")]
    Misaligned { lon: i32, lat: i32, tile_size: i32 },
}

/// Immutable identity of one map tile.
///
/// `lon`/`lat` are the map-unit coordinates of the tile's upper-left corner.
/// Equality and hashing are by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Layer (zoom tier) index, coarsest = 0.
    pub layer: u8,
    /// Longitude of the tile origin in map units.
    pub lon: i32,
    /// Latitude of the tile origin in map units.
    pub lat: i32,
}

impl TileKey {
    /// Creates a tile key.
    #[inline]
    pub fn new(layer: u8, lon: i32, lat: i32) -> Self {
        Self { layer, lon, lat }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}/{}_{}", self.layer, self.lon, self.lat)
    }
}

/// Geometry of one resolution layer.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerGeometry {
    /// Edge length of a tile in map units.
    pub tile_size: i32,
    /// Whether elevation datasets exist for this layer.
    pub has_elevation: bool,
}

/// Ordered set of layers, coarsest first. Index = layer id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerSet {
    layers: Vec<LayerGeometry>,
}

impl LayerSet {
    /// Builds a layer set from plain geometry data (coarsest first).
    pub fn new(layers: Vec<LayerGeometry>) -> Self {
        Self { layers }
    }

    /// Returns the geometry for a layer.
    pub fn get(&self, layer: u8) -> Result<&LayerGeometry, CoordError> {
        self.layers
            .get(layer as usize)
            .ok_or(CoordError::InvalidLayer(layer))
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when no layers are configured.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Iterates layers coarsest to finest, paired with their index.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &LayerGeometry)> {
        self.layers.iter().enumerate().map(|(i, l)| (i as u8, l))
    }

    /// Validates that a key's origin lies on its layer's grid.
    pub fn validate(&self, key: TileKey) -> Result<(), CoordError> {
        let layer = self.get(key.layer)?;
        if key.lon % layer.tile_size != 0 || key.lat % layer.tile_size != 0 {
            return Err(CoordError::Misaligned {
                lon: key.lon,
                lat: key.lat,
                tile_size: layer.tile_size,
            });
        }
        Ok(())
    }
}
