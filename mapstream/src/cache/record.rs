//! Per-tile streaming state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::DatasetKind;
use crate::codec::DecodeSession;
use crate::coord::TileKey;
use crate::elevation::{ElevationGrid, ElevationMesh};
use crate::pool::PoolSlot;

/// Download state of one (tile, dataset) stream.
#[derive(Debug, Clone, Default)]
pub enum StreamState {
    /// Nothing requested yet, or invalidated back for re-download.
    #[default]
    NotRequested,
    /// A download is in flight. At most one per (tile, dataset), enforced
    /// by the transition in [`DatasetStream::begin_download`].
    Downloading,
    /// Raw stream bytes are resident and ready for the decoder.
    Downloaded(Bytes),
    /// The last download failed.
    Failed {
        attempts: u32,
        /// Not-found failures stay failed until the record ages out;
        /// transient ones reset on the retry window.
        not_found: bool,
    },
}

/// State machine plus decode bookkeeping for one dataset of one tile.
#[derive(Debug, Default)]
pub struct DatasetStream {
    state: Mutex<StreamState>,
    /// Next tier the decoder will produce. Monotonic except for eviction
    /// rollback and invalidation.
    decode_cursor: AtomicU32,
    /// Tier count learned from the stream header; 0 until known.
    total_tiers: AtomicU32,
    /// Set when a decode attempt failed without consuming the stream
    /// (scratch exhaustion, pool still full after eviction). The stream
    /// sits out decode selection until the retry window clears it.
    decode_deferred: AtomicBool,
}

impl DatasetStream {
    /// Current state, cloned. `Downloaded` payloads clone cheaply.
    pub fn state(&self) -> StreamState {
        self.state.lock().clone()
    }

    /// `NotRequested` -> `Downloading`. Returns false when the stream is in
    /// any other state, keeping downloads single-flight.
    pub fn begin_download(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, StreamState::NotRequested) {
            *state = StreamState::Downloading;
            true
        } else {
            false
        }
    }

    /// Whether a download would start if this stream were selected.
    pub fn wants_download(&self) -> bool {
        matches!(*self.state.lock(), StreamState::NotRequested)
    }

    /// Stores downloaded bytes.
    pub fn complete_download(&self, bytes: Bytes) {
        *self.state.lock() = StreamState::Downloaded(bytes);
        self.decode_deferred.store(false, Ordering::Release);
    }

    /// Records a failure, bumping the attempt count.
    pub fn fail_download(&self, not_found: bool) {
        let mut state = self.state.lock();
        let attempts = match *state {
            StreamState::Failed { attempts, .. } => attempts + 1,
            _ => 1,
        };
        *state = StreamState::Failed {
            attempts,
            not_found,
        };
    }

    /// True when the stream is failed (either flavor).
    pub fn is_failed(&self) -> bool {
        matches!(*self.state.lock(), StreamState::Failed { .. })
    }

    /// Transient failures become requestable again and deferred decodes
    /// become selectable again; not-found entries stay failed. Returns true
    /// when a reset happened.
    pub fn reset_transient_failure(&self) -> bool {
        let deferred = self.decode_deferred.swap(false, Ordering::AcqRel);
        let mut state = self.state.lock();
        if matches!(
            *state,
            StreamState::Failed {
                not_found: false,
                ..
            }
        ) {
            *state = StreamState::NotRequested;
            true
        } else {
            deferred
        }
    }

    /// Marks the stream failed for this decode attempt; it stays ineligible
    /// until the retry window runs [`Self::reset_transient_failure`].
    pub fn defer_decode(&self) {
        self.decode_deferred.store(true, Ordering::Release);
    }

    /// Throws the stream away entirely, forcing a re-download. Used when
    /// decode hits corruption.
    pub fn invalidate(&self) {
        *self.state.lock() = StreamState::NotRequested;
        self.decode_cursor.store(0, Ordering::Release);
        self.total_tiers.store(0, Ordering::Release);
        self.decode_deferred.store(false, Ordering::Release);
    }

    /// The downloaded bytes, if resident.
    pub fn downloaded(&self) -> Option<Bytes> {
        match &*self.state.lock() {
            StreamState::Downloaded(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn decode_cursor(&self) -> u32 {
        self.decode_cursor.load(Ordering::Acquire)
    }

    pub fn set_decode_cursor(&self, cursor: u32) {
        self.decode_cursor.store(cursor, Ordering::Release);
    }

    /// Tier count, 0 while the header is unparsed.
    pub fn total_tiers(&self) -> u32 {
        self.total_tiers.load(Ordering::Acquire)
    }

    pub fn set_total_tiers(&self, tiers: u32) {
        self.total_tiers.store(tiers, Ordering::Release);
    }

    /// Whether the decoder still has tiers to produce here.
    pub fn wants_decode(&self) -> bool {
        if self.decode_deferred.load(Ordering::Acquire) {
            return false;
        }
        if !matches!(*self.state.lock(), StreamState::Downloaded(_)) {
            return false;
        }
        let total = self.total_tiers();
        total == 0 || self.decode_cursor() < total
    }
}

/// One resident decoded imagery tier.
#[derive(Debug)]
pub struct TierImage {
    pub slot: PoolSlot,
    pub width: usize,
    pub height: usize,
    /// Interleaved sample components per pixel, from the stream header.
    pub components: usize,
}

/// Decoded payloads of one tile, all datasets.
#[derive(Default)]
pub struct DecodedData {
    /// Pool slot per imagery tier, index = tier.
    pub imagery: Vec<Option<TierImage>>,
    /// Live progressive decode session, if one is mid-pyramid.
    pub session: Option<DecodeSession>,
    pub grid: Option<ElevationGrid>,
    pub mesh: Option<ElevationMesh>,
}

/// Full streaming state of one tile.
pub struct TileRecord {
    pub key: TileKey,
    /// Millis since the table epoch of the last consumer request.
    last_request: AtomicU64,
    /// Indexed by `DatasetKind::index`.
    streams: [DatasetStream; 3],
    decoded: RwLock<DecodedData>,
}

impl TileRecord {
    pub fn new(key: TileKey, now_ms: u64) -> Self {
        Self {
            key,
            last_request: AtomicU64::new(now_ms),
            streams: Default::default(),
            decoded: RwLock::new(DecodedData::default()),
        }
    }

    /// The state machine for one dataset.
    pub fn stream(&self, dataset: DatasetKind) -> &DatasetStream {
        &self.streams[dataset.index()]
    }

    /// Stamps the record as just-requested.
    pub fn touch(&self, now_ms: u64) {
        self.last_request.store(now_ms, Ordering::Release);
    }

    pub fn last_request_ms(&self) -> u64 {
        self.last_request.load(Ordering::Acquire)
    }

    /// Read access to the decoded payloads.
    pub fn decoded(&self) -> RwLockReadGuard<'_, DecodedData> {
        self.decoded.read()
    }

    /// Write access for the decode worker and the eviction manager.
    pub fn decoded_mut(&self) -> RwLockWriteGuard<'_, DecodedData> {
        self.decoded.write()
    }

    /// True when a decoded imagery buffer for `tier` is resident.
    pub fn imagery_tier_resident(&self, tier: u32) -> bool {
        self.decoded
            .read()
            .imagery
            .get(tier as usize)
            .is_some_and(|t| t.is_some())
    }

    /// Releases imagery buffers for `from_tier` and everything above,
    /// drops the live session and rolls the decode cursor back. Returns
    /// the number of slots released.
    ///
    /// Tiers below `from_tier` stay resident, so the consumer keeps a
    /// coarse representation while the tile re-refines.
    pub fn clear_imagery_from(&self, from_tier: u32) -> usize {
        let mut decoded = self.decoded.write();
        let mut released = 0;
        for entry in decoded.imagery.iter_mut().skip(from_tier as usize) {
            if entry.take().is_some() {
                released += 1;
            }
        }
        decoded.session = None;
        let stream = self.stream(DatasetKind::Imagery);
        stream.set_decode_cursor(stream.decode_cursor().min(from_tier));
        released
    }
}
