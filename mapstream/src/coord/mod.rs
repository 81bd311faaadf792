//! Tile identity and layer geometry.
//!
//! Tiles are addressed by integer map units: the globe spans
//! `[-MAX_LONGITUDE, MAX_LONGITUDE]` east-west and
//! `[-MAX_LATITUDE, MAX_LATITUDE]` north-south. A [`TileKey`] names one tile
//! by its layer index and the map-unit coordinates of its upper-left corner.
//!
//! Distances are measured between a viewpoint and a tile center, taking the
//! shorter way around the antimeridian so that tiles straddling the date
//! line are not penalized.

mod types;

pub use types::{CoordError, LayerGeometry, LayerSet, TileKey};

/// Eastern/western extent of the globe in map units (degrees x 1e5).
pub const MAX_LONGITUDE: i32 = 18_000_000;

/// Northern/southern extent of the globe in map units.
pub const MAX_LATITUDE: i32 = 9_000_000;

/// Returns the center of a tile in map units.
///
/// The key holds the upper-left corner; latitude grows northward, so the
/// center sits half a tile east and half a tile south of the origin.
#[inline]
pub fn tile_center(key: TileKey, layer: &LayerGeometry) -> (f64, f64) {
    let half = layer.tile_size as f64 / 2.0;
    (key.lon as f64 + half, key.lat as f64 - half)
}

/// Squared 2D distance between two points, ignoring wrap-around.
#[inline]
fn distance_sq(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy
}

/// Distance from a viewpoint to a point, wrapping across the antimeridian.
///
/// Both the direct distance and the distance the other way around the globe
/// are computed; the smaller wins.
pub fn wrapped_distance(vx: f64, vy: f64, px: f64, py: f64) -> f64 {
    let direct = distance_sq(vx, vy, px, py);

    let span = 2.0 * MAX_LONGITUDE as f64;
    let wrapped_px = if vx < px { px - span } else { px + span };
    let wrapped = distance_sq(vx, vy, wrapped_px, py);

    direct.min(wrapped).sqrt()
}

/// Distance from a viewpoint to a tile's center.
#[inline]
pub fn distance_to_tile(vx: f64, vy: f64, key: TileKey, layer: &LayerGeometry) -> f64 {
    let (cx, cy) = tile_center(key, layer);
    wrapped_distance(vx, vy, cx, cy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(tile_size: i32) -> LayerGeometry {
        LayerGeometry {
            tile_size,
            has_elevation: true,
        }
    }

    #[test]
    fn test_tile_center_offsets_from_origin() {
        let key = TileKey::new(0, 100_000, 50_000);
        let (cx, cy) = tile_center(key, &layer(10_000));
        assert_eq!(cx, 105_000.0);
        assert_eq!(cy, 45_000.0);
    }

    #[test]
    fn test_direct_distance_when_no_wrap_helps() {
        let d = wrapped_distance(0.0, 0.0, 30_000.0, 40_000.0);
        assert_eq!(d, 50_000.0);
    }

    #[test]
    fn test_wrap_across_antimeridian_is_shorter() {
        // Viewpoint near the eastern edge, tile near the western edge.
        let vx = MAX_LONGITUDE as f64 - 10_000.0;
        let px = -(MAX_LONGITUDE as f64) + 10_000.0;
        let d = wrapped_distance(vx, 0.0, px, 0.0);
        assert_eq!(d, 20_000.0);
    }

    #[test]
    fn test_wrap_is_symmetric() {
        let vx = -(MAX_LONGITUDE as f64) + 5_000.0;
        let px = MAX_LONGITUDE as f64 - 5_000.0;
        let d = wrapped_distance(vx, 0.0, px, 0.0);
        assert_eq!(d, 10_000.0);
    }

    #[test]
    fn test_distance_to_tile_uses_center() {
        let key = TileKey::new(2, 100_000, 50_000);
        let d = distance_to_tile(105_000.0, 45_000.0, key, &layer(10_000));
        assert_eq!(d, 0.0);
    }
}
