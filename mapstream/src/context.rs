//! Shared view context for dispatchers and the eviction manager.
//!
//! The render consumer moves the viewpoint; the two workers only read it.
//! The context is passed explicitly (by `Arc`) into everything that needs
//! it; there is no process-wide singleton.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::coord::{self, LayerSet, TileKey};

/// Current observer position in map units, plus how far it can see.
#[derive(Debug, Clone, Copy)]
pub struct Viewpoint {
    /// Longitude in map units.
    pub lon: f64,
    /// Latitude in map units.
    pub lat: f64,
    /// Tiles whose center is further than this are considered out of view.
    pub view_distance: f64,
}

impl Viewpoint {
    /// Creates a viewpoint.
    pub fn new(lon: f64, lat: f64, view_distance: f64) -> Self {
        Self {
            lon,
            lat,
            view_distance,
        }
    }
}

impl Default for Viewpoint {
    fn default() -> Self {
        Self {
            lon: 0.0,
            lat: 0.0,
            view_distance: f64::MAX,
        }
    }
}

/// View state shared between the render consumer and the workers.
pub struct ViewContext {
    viewpoint: RwLock<Viewpoint>,
    layers: LayerSet,
}

impl ViewContext {
    /// Creates a context over a fixed layer set.
    pub fn new(layers: LayerSet, viewpoint: Viewpoint) -> Arc<Self> {
        Arc::new(Self {
            viewpoint: RwLock::new(viewpoint),
            layers,
        })
    }

    /// Replaces the viewpoint. Called by the render consumer as the camera
    /// moves; takes effect on the workers' next selection scan.
    pub fn set_viewpoint(&self, viewpoint: Viewpoint) {
        *self.viewpoint.write() = viewpoint;
    }

    /// Snapshot of the current viewpoint.
    pub fn viewpoint(&self) -> Viewpoint {
        *self.viewpoint.read()
    }

    /// The configured layer geometry.
    pub fn layers(&self) -> &LayerSet {
        &self.layers
    }

    /// Distance from the current viewpoint to a tile's center.
    ///
    /// Returns `f64::MAX` for keys on unknown layers so they sort last.
    pub fn distance_to(&self, key: TileKey) -> f64 {
        let vp = self.viewpoint();
        match self.layers.get(key.layer) {
            Ok(layer) => coord::distance_to_tile(vp.lon, vp.lat, key, layer),
            Err(_) => f64::MAX,
        }
    }

    /// Whether a tile is inside the view range.
    ///
    /// The real frustum test lives in the renderer; the pipeline only needs
    /// a conservative notion of "no longer interesting" for eviction.
    pub fn in_view(&self, key: TileKey) -> bool {
        let vp = self.viewpoint();
        self.distance_to(key) <= vp.view_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::LayerGeometry;

    fn layers() -> LayerSet {
        LayerSet::new(vec![LayerGeometry {
            tile_size: 10_000,
            has_elevation: true,
        }])
    }

    #[test]
    fn test_viewpoint_update_is_visible_to_readers() {
        let ctx = ViewContext::new(layers(), Viewpoint::default());
        ctx.set_viewpoint(Viewpoint::new(5.0, 6.0, 100.0));
        let vp = ctx.viewpoint();
        assert_eq!(vp.lon, 5.0);
        assert_eq!(vp.lat, 6.0);
    }

    #[test]
    fn test_in_view_respects_view_distance() {
        let ctx = ViewContext::new(layers(), Viewpoint::new(5_000.0, -5_000.0, 1_000.0));
        // Tile centered exactly on the viewpoint.
        assert!(ctx.in_view(TileKey::new(0, 0, 0)));
        // Tile several sizes away.
        assert!(!ctx.in_view(TileKey::new(0, 100_000, 0)));
    }

    #[test]
    fn test_unknown_layer_sorts_last_and_out_of_view() {
        let ctx = ViewContext::new(layers(), Viewpoint::new(0.0, 0.0, 1_000.0));
        let key = TileKey::new(9, 0, 0);
        assert_eq!(ctx.distance_to(key), f64::MAX);
        assert!(!ctx.in_view(key));
    }
}
