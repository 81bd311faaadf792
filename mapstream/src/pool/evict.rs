//! Slot reclamation when a pool tier runs dry.

use tracing::debug;

use crate::cache::TileCacheTable;
use crate::context::ViewContext;
use crate::coord::TileKey;

/// Frees one holder's buffers at `tier` so `protect` can acquire a slot.
///
/// Victim choice: any holder whose tile left the view wins outright;
/// otherwise the holder furthest from the viewpoint. The victim loses
/// `tier` and every finer tier (coarser tiers stay resident, so it keeps a
/// degraded representation), and its decode cursor rolls back accordingly.
///
/// Returns the number of slots released; 0 means every holder at that tier
/// is the requester itself or nothing holds the tier.
pub fn evict_holder(
    tier: u32,
    table: &TileCacheTable,
    ctx: &ViewContext,
    protect: TileKey,
) -> usize {
    let mut fallback: Option<(std::sync::Arc<crate::cache::TileRecord>, f64)> = None;

    for record in table.all() {
        if record.key == protect || !record.imagery_tier_resident(tier) {
            continue;
        }
        if !ctx.in_view(record.key) {
            debug!(key = %record.key, tier, "evicting out-of-view holder");
            return record.clear_imagery_from(tier);
        }
        let distance = ctx.distance_to(record.key);
        match &fallback {
            Some((_, best)) if *best >= distance => {}
            _ => fallback = Some((record, distance)),
        }
    }

    match fallback {
        Some((victim, distance)) => {
            debug!(key = %victim.key, tier, distance, "evicting furthest holder");
            victim.clear_imagery_from(tier)
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DatasetKind, TierImage};
    use crate::context::Viewpoint;
    use crate::coord::{LayerGeometry, LayerSet};
    use crate::pool::BufferPool;

    fn ctx(view_distance: f64) -> std::sync::Arc<ViewContext> {
        let layers = LayerSet::new(vec![LayerGeometry {
            tile_size: 10_000,
            has_elevation: false,
        }]);
        ViewContext::new(layers, Viewpoint::new(0.0, 0.0, view_distance))
    }

    fn hold_tiers(table: &TileCacheTable, pool: &BufferPool, key: TileKey, tiers: u32) {
        let record = table.get_or_create(key);
        let mut decoded = record.decoded_mut();
        for tier in 0..tiers {
            decoded.imagery.push(Some(TierImage {
                slot: pool.acquire(tier).unwrap(),
                width: 4,
                height: 4,
                components: 3,
            }));
        }
        drop(decoded);
        record
            .stream(DatasetKind::Imagery)
            .set_decode_cursor(tiers);
    }

    #[test]
    fn test_out_of_view_holder_evicted_first() {
        let table = TileCacheTable::new();
        let pool = BufferPool::new(16, 2, 8);
        let ctx = ctx(50_000.0);

        let near = TileKey::new(0, 10_000, 0);
        let far_out = TileKey::new(0, 200_000, 0);
        hold_tiers(&table, &pool, near, 2);
        hold_tiers(&table, &pool, far_out, 2);

        let released = evict_holder(1, &table, &ctx, TileKey::new(0, 50_000, 0));
        assert_eq!(released, 1);
        // The out-of-view tile lost tier 1 but kept tier 0.
        let victim = table.get_if_exists(far_out).unwrap();
        assert!(victim.imagery_tier_resident(0));
        assert!(!victim.imagery_tier_resident(1));
        assert!(table.get_if_exists(near).unwrap().imagery_tier_resident(1));
    }

    #[test]
    fn test_furthest_in_view_holder_evicted_otherwise() {
        let table = TileCacheTable::new();
        let pool = BufferPool::new(16, 2, 8);
        let ctx = ctx(f64::MAX);

        let close = TileKey::new(0, 10_000, 0);
        let far = TileKey::new(0, 80_000, 0);
        hold_tiers(&table, &pool, close, 2);
        hold_tiers(&table, &pool, far, 2);

        evict_holder(1, &table, &ctx, TileKey::new(0, 20_000, 0));
        assert!(!table.get_if_exists(far).unwrap().imagery_tier_resident(1));
        assert!(table.get_if_exists(close).unwrap().imagery_tier_resident(1));
    }

    #[test]
    fn test_requester_is_never_the_victim() {
        let table = TileCacheTable::new();
        let pool = BufferPool::new(16, 1, 8);
        let ctx = ctx(f64::MAX);

        let only = TileKey::new(0, 10_000, 0);
        hold_tiers(&table, &pool, only, 1);

        assert_eq!(evict_holder(0, &table, &ctx, only), 0);
        assert!(table.get_if_exists(only).unwrap().imagery_tier_resident(0));
    }
}
