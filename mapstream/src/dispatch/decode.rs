//! Decode worker loop.
//!
//! Refinement is breadth-first across the whole table: every eligible tile
//! gets its tier `t` before any tile starts tier `t + 1`, with the nearest
//! tile first within a tier. Elevation payloads are single-shot and ride
//! in the tier-0 round.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{better_candidate, WorkSignal};
use crate::cache::{DatasetKind, TierImage, TileCacheTable, TileRecord};
use crate::codec::{CodecError, DecodeSession, StreamHeader};
use crate::config::PipelineConfig;
use crate::context::ViewContext;
use crate::elevation::{ElevationGrid, ElevationMesh};
use crate::pool::{evict_holder, BufferPool};
use crate::telemetry::PipelineMetrics;

pub(super) struct DecodeWorker {
    pub table: Arc<TileCacheTable>,
    pub ctx: Arc<ViewContext>,
    pub pool: BufferPool,
    pub metrics: Arc<PipelineMetrics>,
    pub signal: Arc<WorkSignal>,
    pub config: PipelineConfig,
    pub stop: Arc<std::sync::atomic::AtomicBool>,
}

impl DecodeWorker {
    pub fn run(self) {
        info!("decode worker running");
        while !self.stop.load(Ordering::Acquire) {
            if !self.pass() {
                self.signal.wait_timeout(self.config.decode_wait);
            }
        }
        info!("decode worker stopped");
    }

    /// Performs one unit of decode work. Returns false when nothing is
    /// eligible anywhere.
    fn pass(&self) -> bool {
        let records = self.table.all();
        for tier in 0..self.pool.tier_count() as u32 {
            let mut best: Option<(f64, Arc<TileRecord>, DatasetKind)> = None;
            for record in &records {
                for &dataset in &DatasetKind::DOWNLOAD_PRIORITY {
                    if !step_eligible(record, dataset, tier) {
                        continue;
                    }
                    let distance = self.ctx.distance_to(record.key);
                    let current = best
                        .as_ref()
                        .map(|(d, r, ds)| (*d, *ds, r.key.layer));
                    if better_candidate(current, distance, dataset, record.key.layer) {
                        best = Some((distance, Arc::clone(record), dataset));
                    }
                }
            }
            if let Some((_, record, dataset)) = best {
                match dataset {
                    DatasetKind::Imagery => self.decode_imagery(&record, tier),
                    _ => self.parse_elevation(&record, dataset),
                }
                return true;
            }
        }
        false
    }

    /// Advances one tile's imagery to `target_tier` inclusive.
    ///
    /// Normally that is a single tier. After an eviction rolled the cursor
    /// back, the session is gone and the pyramid below the cursor is
    /// re-synthesized first, rewriting the still-resident coarse buffers.
    fn decode_imagery(&self, record: &TileRecord, target_tier: u32) {
        let stream = record.stream(DatasetKind::Imagery);
        let Some(bytes) = stream.downloaded() else {
            return;
        };
        let mut decoded = record.decoded_mut();

        if decoded.session.is_none() {
            let header = match StreamHeader::parse(&bytes) {
                Ok(header) => header,
                Err(err) => {
                    drop(decoded);
                    warn!(key = %record.key, %err, "bad stream header, forcing re-download");
                    stream.invalidate();
                    self.metrics.decode_failed();
                    return;
                }
            };
            stream.set_total_tiers(header.tiers as u32);
            if target_tier >= header.tiers as u32 {
                return;
            }
            match DecodeSession::new(header) {
                Ok(session) => decoded.session = Some(session),
                Err(err) => {
                    drop(decoded);
                    warn!(key = %record.key, %err, "decode session allocation failed");
                    stream.defer_decode();
                    self.metrics.decode_failed();
                    return;
                }
            }
        }

        loop {
            let next = match &decoded.session {
                Some(session) => session.next_tier(),
                None => return,
            };
            if next > target_tier {
                break;
            }
            if !self.decode_one_tier(record, &mut decoded, &bytes, next) {
                return;
            }
        }
        stream.set_decode_cursor(target_tier + 1);
    }

    /// Decodes exactly one tier into a pool slot. On failure the slot goes
    /// back to the pool and the caller stops; the error handling inside
    /// distinguishes corruption (stream invalidated, re-downloaded) from
    /// resource exhaustion (scratch discarded, retried later).
    fn decode_one_tier(
        &self,
        record: &TileRecord,
        decoded: &mut crate::cache::DecodedData,
        bytes: &[u8],
        tier: u32,
    ) -> bool {
        // Byte range for this tier, body-relative plus the header length.
        let (range, body_start) = match &decoded.session {
            Some(session) => {
                let header = session.header();
                (header.tier_range(tier as usize), header.header_len)
            }
            None => return false,
        };
        let Some(tier_bytes) = bytes.get(body_start + range.0..body_start + range.1) else {
            decoded.session = None;
            warn!(key = %record.key, tier, "stream shorter than its tier index, forcing re-download");
            record.stream(DatasetKind::Imagery).invalidate();
            self.metrics.decode_failed();
            return false;
        };

        // Destination buffer: reuse the resident slot or take a fresh one,
        // evicting a less interesting holder when the tier is full.
        if decoded.imagery.len() <= tier as usize {
            decoded.imagery.resize_with(tier as usize + 1, || None);
        }
        let mut slot = match decoded.imagery[tier as usize].take() {
            Some(image) => image.slot,
            None => match self.pool.acquire(tier) {
                Ok(slot) => slot,
                Err(_) => {
                    let released = evict_holder(tier, &self.table, &self.ctx, record.key);
                    self.metrics.slots_evicted(released as u64);
                    match self.pool.acquire(tier) {
                        Ok(slot) => slot,
                        Err(_) => {
                            debug!(key = %record.key, tier, "pool still full, deferring this tile");
                            record.stream(DatasetKind::Imagery).defer_decode();
                            return false;
                        }
                    }
                }
            },
        };

        let outcome = match decoded.session.as_mut() {
            Some(session) => session.decode_tier(tier_bytes, tier),
            None => return false,
        };
        let pixels = match outcome {
            Ok(pixels) => pixels,
            Err(CodecError::Resource) => {
                decoded.session = None;
                warn!(key = %record.key, tier, "decoder scratch exhausted, dropping session");
                record.stream(DatasetKind::Imagery).defer_decode();
                self.metrics.decode_failed();
                return false;
            }
            Err(err) => {
                decoded.session = None;
                warn!(key = %record.key, tier, %err, "corrupt stream, forcing re-download");
                record.stream(DatasetKind::Imagery).invalidate();
                self.metrics.decode_failed();
                return false;
            }
        };

        if pixels.samples.len() > slot.pixels().len() {
            decoded.session = None;
            warn!(
                key = %record.key,
                tier,
                needed = pixels.samples.len(),
                capacity = slot.pixels().len(),
                "tile larger than pool slots, quarantining stream"
            );
            // Re-downloading cannot shrink the tile; the stream stays
            // failed until the record ages out.
            record.stream(DatasetKind::Imagery).fail_download(true);
            self.metrics.decode_failed();
            return false;
        }
        slot.pixels_mut()[..pixels.samples.len()].copy_from_slice(&pixels.samples);
        decoded.imagery[tier as usize] = Some(TierImage {
            slot,
            width: pixels.width,
            height: pixels.height,
            components: pixels.components,
        });
        self.metrics.tier_decoded();
        debug!(key = %record.key, tier, "tier resident");
        true
    }

    /// Single-shot elevation parse; the cursor jumps 0 -> 1.
    fn parse_elevation(&self, record: &TileRecord, dataset: DatasetKind) {
        let stream = record.stream(dataset);
        let Some(bytes) = stream.downloaded() else {
            return;
        };

        let parsed: Result<(), crate::elevation::FormatError> = match dataset {
            DatasetKind::ElevationGrid => ElevationGrid::parse(&bytes).map(|grid| {
                record.decoded_mut().grid = Some(grid);
            }),
            DatasetKind::ElevationMesh => ElevationMesh::parse(&bytes).map(|mesh| {
                record.decoded_mut().mesh = Some(mesh);
            }),
            DatasetKind::Imagery => return,
        };

        match parsed {
            Ok(()) => {
                stream.set_total_tiers(1);
                stream.set_decode_cursor(1);
                self.metrics.tier_decoded();
                debug!(key = %record.key, %dataset, "elevation resident");
            }
            Err(err) => {
                warn!(key = %record.key, %dataset, %err, "corrupt elevation payload, forcing re-download");
                stream.invalidate();
                self.metrics.decode_failed();
            }
        }
    }
}

/// Whether `record`'s `dataset` has work at exactly this tier round.
fn step_eligible(record: &TileRecord, dataset: DatasetKind, tier: u32) -> bool {
    let stream = record.stream(dataset);
    if !stream.wants_decode() {
        return false;
    }
    match dataset {
        DatasetKind::Imagery => stream.decode_cursor() == tier,
        // Elevation is single-shot and rides the tier-0 round.
        _ => tier == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use bytes::Bytes;

    use crate::cache::StreamState;
    use crate::codec::encode::{encode_stream, EncodeParams};
    use crate::context::Viewpoint;
    use crate::coord::{LayerGeometry, LayerSet, TileKey};

    fn encoded_tile_of(edge: usize) -> Bytes {
        let mut channels = vec![vec![0u8; edge * edge]; 3];
        for y in 0..edge {
            for x in 0..edge {
                channels[0][y * edge + x] = (x * 30 % 256) as u8;
                channels[1][y * edge + x] = (y * 30 % 256) as u8;
                channels[2][y * edge + x] = ((x + y) * 10 % 256) as u8;
            }
        }
        let params = EncodeParams {
            tiers: 2,
            ..EncodeParams::default()
        };
        Bytes::from(encode_stream(edge, edge, &channels, &params).unwrap())
    }

    fn encoded_tile() -> Bytes {
        encoded_tile_of(8)
    }

    fn mesh_payload() -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&6400u32.to_be_bytes());
        for v in [0.0f32, 12.5, 0.0, 1.0, 8.0, 1.0] {
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        Bytes::from(out)
    }

    fn worker(slots_per_tier: usize) -> DecodeWorker {
        let layers = LayerSet::new(vec![LayerGeometry {
            tile_size: 10_000,
            has_elevation: true,
        }]);
        DecodeWorker {
            table: Arc::new(TileCacheTable::new()),
            ctx: ViewContext::new(layers, Viewpoint::new(0.0, 0.0, f64::MAX)),
            pool: BufferPool::new(8, 2, slots_per_tier),
            metrics: Arc::new(PipelineMetrics::new()),
            signal: Arc::new(WorkSignal::new()),
            config: PipelineConfig::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn load(worker: &DecodeWorker, key: TileKey, dataset: DatasetKind, bytes: Bytes) -> Arc<TileRecord> {
        let record = worker.table.get_or_create(key);
        assert!(record.stream(dataset).begin_download());
        record.stream(dataset).complete_download(bytes);
        record
    }

    #[test]
    fn test_refinement_is_breadth_first_across_tiles() {
        let worker = worker(8);
        let near = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );
        let far = load(
            &worker,
            TileKey::new(0, 50_000, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );
        let cursor =
            |r: &TileRecord| r.stream(DatasetKind::Imagery).decode_cursor();

        // Both tiles get tier 0 before either starts tier 1, nearest first.
        assert!(worker.pass());
        assert_eq!((cursor(&near), cursor(&far)), (1, 0));
        assert!(worker.pass());
        assert_eq!((cursor(&near), cursor(&far)), (1, 1));
        assert!(worker.pass());
        assert_eq!((cursor(&near), cursor(&far)), (2, 1));
        assert!(worker.pass());
        assert_eq!((cursor(&near), cursor(&far)), (2, 2));
        assert!(!worker.pass());

        assert!(near.imagery_tier_resident(0));
        assert!(near.imagery_tier_resident(1));
        let decoded = near.decoded();
        let image = decoded.imagery[1].as_ref().unwrap();
        assert_eq!((image.width, image.height), (8, 8));
    }

    #[test]
    fn test_elevation_rides_the_first_round() {
        let worker = worker(8);
        let with_imagery = load(
            &worker,
            TileKey::new(0, 50_000, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );
        let with_mesh = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::ElevationMesh,
            mesh_payload(),
        );

        // Same round, same distance order, but imagery outranks the mesh
        // only when distances tie; here the mesh tile is closer.
        assert!(worker.pass());
        assert!(with_mesh.decoded().mesh.is_some());
        assert_eq!(with_mesh.stream(DatasetKind::ElevationMesh).decode_cursor(), 1);

        assert!(worker.pass());
        assert!(with_imagery.imagery_tier_resident(0));
    }

    #[test]
    fn test_exhausted_tier_evicts_furthest_holder() {
        let worker = worker(1);
        let far = load(
            &worker,
            TileKey::new(0, 50_000, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );
        assert!(worker.pass());
        assert!(far.imagery_tier_resident(0));

        // The nearer tile needs the only tier-0 slot; the far tile loses it.
        let near = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );
        assert!(worker.pass());
        assert!(near.imagery_tier_resident(0));
        assert!(!far.imagery_tier_resident(0));
        assert_eq!(worker.metrics.snapshot().slots_evicted, 1);
        // The victim's cursor rolled back so it can catch up later.
        assert_eq!(far.stream(DatasetKind::Imagery).decode_cursor(), 0);
    }

    #[test]
    fn test_starved_tile_defers_instead_of_spinning() {
        let worker = worker(1);
        // The only tier-0 slot is held outside the table, so eviction finds
        // no victim and the acquire retry fails too.
        let held = worker.pool.acquire(0).unwrap();
        let record = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            encoded_tile(),
        );

        // One failed attempt, then the tile sits out until the retry
        // window instead of being re-selected forever.
        assert!(worker.pass());
        assert_eq!(record.stream(DatasetKind::Imagery).decode_cursor(), 0);
        assert!(!worker.pass());
        assert!(!worker.pass());

        drop(held);
        assert_eq!(worker.table.reset_transient_failures(), 1);
        assert!(worker.pass());
        assert!(record.imagery_tier_resident(0));
        assert_eq!(record.stream(DatasetKind::Imagery).decode_cursor(), 1);
    }

    #[test]
    fn test_oversize_tile_is_quarantined() {
        // 16-pixel tiers against 8-pixel pool slots: the decoded base band
        // can never fit, and re-downloading would not change that.
        let worker = worker(8);
        let record = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            encoded_tile_of(16),
        );

        assert!(worker.pass());
        assert!(matches!(
            record.stream(DatasetKind::Imagery).state(),
            StreamState::Failed {
                not_found: true,
                ..
            }
        ));
        assert_eq!(worker.metrics.snapshot().decode_failures, 1);
        assert!(!record.imagery_tier_resident(0));
        // Quarantined, not re-offered to either worker.
        assert!(!worker.pass());
        assert!(!record.stream(DatasetKind::Imagery).wants_download());
    }

    #[test]
    fn test_corrupt_header_forces_redownload() {
        let worker = worker(8);
        let record = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            Bytes::from_static(b"definitely not an image stream"),
        );

        assert!(worker.pass());
        assert!(matches!(
            record.stream(DatasetKind::Imagery).state(),
            StreamState::NotRequested
        ));
        assert_eq!(worker.metrics.snapshot().decode_failures, 1);
        assert!(!record.imagery_tier_resident(0));
    }

    #[test]
    fn test_corrupt_body_forces_redownload() {
        let worker = worker(8);
        let mut bytes = encoded_tile().to_vec();
        let len = bytes.len();
        // Truncate into the body; the header still parses.
        bytes.truncate(len - (len / 4));
        let record = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::Imagery,
            Bytes::from(bytes),
        );

        // Tier rounds run until the short tier range is hit.
        while worker.pass() {}
        assert!(matches!(
            record.stream(DatasetKind::Imagery).state(),
            StreamState::NotRequested
        ));
        assert!(worker.metrics.snapshot().decode_failures >= 1);
    }

    #[test]
    fn test_corrupt_mesh_forces_redownload() {
        let worker = worker(8);
        let mut bytes = mesh_payload().to_vec();
        // Point an index past the point cloud.
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&99u32.to_be_bytes());
        let record = load(
            &worker,
            TileKey::new(0, 0, 0),
            DatasetKind::ElevationMesh,
            Bytes::from(bytes),
        );

        assert!(worker.pass());
        assert!(matches!(
            record.stream(DatasetKind::ElevationMesh).state(),
            StreamState::NotRequested
        ));
        assert!(record.decoded().mesh.is_none());
    }
}
