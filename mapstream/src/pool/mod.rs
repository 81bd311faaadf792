//! Fixed-capacity pixel buffer pool.
//!
//! Decoded imagery lives in preallocated per-tier buffers; the pool never
//! allocates after construction. A [`PoolSlot`] owns its buffer while in
//! use and hands it back to the free list when dropped, so free + in-use
//! always equals the configured capacity at every tier.
//!
//! Pool exhaustion is not an error condition for the pipeline: it is the
//! signal for the eviction manager (see [`evict`]) to reclaim a slot from
//! the least interesting holder.

mod evict;

pub use evict::evict_holder;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// All slots at the requested tier are in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no free buffer slot at tier {tier}")]
pub struct PoolExhausted {
    pub tier: u32,
}

struct PoolShared {
    /// Free list per tier.
    tiers: Vec<Mutex<Vec<Vec<u8>>>>,
    slots_per_tier: usize,
}

/// Per-tier pool of fixed pixel buffers.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Preallocates `slots_per_tier` buffers for each of `tiers` tiers.
    ///
    /// Tier `tiers - 1` holds full `tile_pixels` x `tile_pixels` tiles;
    /// each coarser tier halves the edge length. Buffers are sized for
    /// three interleaved components.
    pub fn new(tile_pixels: u16, tiers: u8, slots_per_tier: usize) -> Self {
        let tiers_vec = (0..tiers)
            .map(|t| {
                let edge = (tile_pixels as usize) >> (tiers - 1 - t);
                let size = edge.max(1) * edge.max(1) * 3;
                let free = (0..slots_per_tier).map(|_| vec![0u8; size]).collect();
                Mutex::new(free)
            })
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                tiers: tiers_vec,
                slots_per_tier,
            }),
        }
    }

    /// Takes a free slot at `tier`, or reports exhaustion.
    pub fn acquire(&self, tier: u32) -> Result<PoolSlot, PoolExhausted> {
        let free = self
            .shared
            .tiers
            .get(tier as usize)
            .ok_or(PoolExhausted { tier })?;
        let buf = free.lock().pop().ok_or(PoolExhausted { tier })?;
        Ok(PoolSlot {
            tier,
            buf: Some(buf),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Returns a slot to its free list. Dropping the slot does the same;
    /// this form exists for call sites that want the handoff explicit.
    pub fn release(&self, slot: PoolSlot) {
        drop(slot);
    }

    /// Free slots currently available at `tier`.
    pub fn free_count(&self, tier: u32) -> usize {
        self.shared
            .tiers
            .get(tier as usize)
            .map_or(0, |f| f.lock().len())
    }

    /// Configured capacity of every tier.
    pub fn slots_per_tier(&self) -> usize {
        self.shared.slots_per_tier
    }

    /// Number of tiers the pool provisions.
    pub fn tier_count(&self) -> usize {
        self.shared.tiers.len()
    }
}

/// An owned pixel buffer checked out of the pool.
pub struct PoolSlot {
    tier: u32,
    /// `Some` until the slot is dropped.
    buf: Option<Vec<u8>>,
    shared: Arc<PoolShared>,
}

impl PoolSlot {
    /// The tier this slot belongs to.
    pub fn tier(&self) -> u32 {
        self.tier
    }

    /// The pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Mutable pixel bytes.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Some(free) = self.shared.tiers.get(self.tier as usize) {
                free.lock().push(buf);
            }
        }
    }
}

impl std::fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSlot")
            .field("tier", &self.tier)
            .field("len", &self.pixels().len())
            .finish()
    }
}
