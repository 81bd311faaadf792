//! The two pipeline workers and their coordination.
//!
//! One thread downloads, one thread decodes. Each sleeps on a [`WorkSignal`]
//! when it finds nothing to do and is woken by new consumer requests or by
//! the other worker handing work over. [`TilePipeline`] owns both threads
//! plus all shared state and is the only surface the render consumer talks
//! to.

mod decode;
mod download;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::cache::{DatasetKind, TileCacheTable};
use crate::codec::TierPixels;
use crate::config::PipelineConfig;
use crate::context::ViewContext;
use crate::coord::TileKey;
use crate::fetch::TileFetcher;
use crate::pool::BufferPool;
use crate::telemetry::{MetricsSnapshot, PipelineMetrics};

/// Wake-up channel between requesters and a worker.
///
/// Notifications are level-triggered: a notify before the worker waits is
/// not lost, it makes the next wait return immediately.
#[derive(Default)]
pub struct WorkSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl WorkSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the worker.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    /// Waits until notified or until `timeout` elapses. Returns true when a
    /// notification was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.condvar.wait_for(&mut pending, timeout);
        }
        std::mem::take(&mut pending)
    }
}

/// Consumer-facing snapshot of one tile's readiness.
#[derive(Debug, Clone)]
pub struct TileView {
    pub key: TileKey,
    /// Per-tier imagery readiness, index = tier.
    pub ready_tiers: Vec<bool>,
    /// Pixels of the finest resident imagery tier, if any.
    pub finest: Option<TierPixels>,
    pub grid_ready: bool,
    pub mesh_ready: bool,
}

/// The streaming pipeline: cache table, buffer pool, and the two workers.
pub struct TilePipeline {
    table: Arc<TileCacheTable>,
    ctx: Arc<ViewContext>,
    pool: BufferPool,
    metrics: Arc<PipelineMetrics>,
    download_signal: Arc<WorkSignal>,
    decode_signal: Arc<WorkSignal>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl TilePipeline {
    /// Builds the pipeline and spawns both workers.
    pub fn new(
        config: PipelineConfig,
        ctx: Arc<ViewContext>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Self {
        let table = Arc::new(TileCacheTable::new());
        let download_signal = Arc::new(WorkSignal::new());
        table.set_download_signal(Arc::clone(&download_signal));
        let pool = BufferPool::new(
            config.tile_pixels,
            config.pyramid_tiers,
            config.slots_per_tier,
        );
        let metrics = Arc::new(PipelineMetrics::new());
        let decode_signal = Arc::new(WorkSignal::new());
        let stop = Arc::new(AtomicBool::new(false));

        let downloader = download::DownloadWorker {
            table: Arc::clone(&table),
            ctx: Arc::clone(&ctx),
            fetcher,
            metrics: Arc::clone(&metrics),
            signal: Arc::clone(&download_signal),
            decode_signal: Arc::clone(&decode_signal),
            config: config.clone(),
            stop: Arc::clone(&stop),
        };
        let decoder = decode::DecodeWorker {
            table: Arc::clone(&table),
            ctx: Arc::clone(&ctx),
            pool: pool.clone(),
            metrics: Arc::clone(&metrics),
            signal: Arc::clone(&decode_signal),
            config: config.clone(),
            stop: Arc::clone(&stop),
        };

        let workers = vec![
            std::thread::Builder::new()
                .name("mapstream-download".into())
                .spawn(move || downloader.run())
                .expect("failed to spawn download worker"),
            std::thread::Builder::new()
                .name("mapstream-decode".into())
                .spawn(move || decoder.run())
                .expect("failed to spawn decode worker"),
        ];
        info!("pipeline started");

        Self {
            table,
            ctx,
            pool,
            metrics,
            download_signal,
            decode_signal,
            stop,
            workers,
        }
    }

    /// Requests a tile and reports what is already resident.
    ///
    /// [`TileCacheTable::get_or_create`] wakes the download worker and
    /// re-stamps the tile as recently wanted.
    pub fn request(&self, key: TileKey) -> TileView {
        let record = self.table.get_or_create(key);

        let decoded = record.decoded();
        let ready_tiers: Vec<bool> = decoded.imagery.iter().map(|t| t.is_some()).collect();
        let finest = decoded
            .imagery
            .iter()
            .enumerate()
            .rev()
            .find_map(|(tier, entry)| entry.as_ref().map(|img| (tier, img)))
            .map(|(tier, img)| TierPixels {
                tier: tier as u32,
                width: img.width,
                height: img.height,
                components: img.components,
                samples: img.slot.pixels()[..img.width * img.height * img.components].to_vec(),
            });
        TileView {
            key,
            ready_tiers,
            finest,
            grid_ready: decoded.grid.is_some(),
            mesh_ready: decoded.mesh.is_some(),
        }
    }

    /// The shared view context; move the viewpoint through this.
    pub fn context(&self) -> &Arc<ViewContext> {
        &self.ctx
    }

    /// The cache table, exposed for inspection.
    pub fn table(&self) -> &Arc<TileCacheTable> {
        &self.table
    }

    /// The buffer pool, exposed for inspection.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wakes the decode worker; used after an external state change.
    pub fn poke_decoder(&self) {
        self.decode_signal.notify();
    }

    /// Stops both workers and joins them.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        self.download_signal.notify();
        self.decode_signal.notify();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("pipeline stopped");
    }
}

impl Drop for TilePipeline {
    fn drop(&mut self) {
        // Covers pipelines dropped without an explicit shutdown; workers
        // notice the flag on their next wake.
        self.stop.store(true, Ordering::Release);
        self.download_signal.notify();
        self.decode_signal.notify();
    }
}

/// Selection shared by both workers: the minimum-distance candidate, with
/// ties broken by dataset priority and then coarser layer first.
pub(crate) fn better_candidate(
    current: Option<(f64, DatasetKind, u8)>,
    distance: f64,
    dataset: DatasetKind,
    layer: u8,
) -> bool {
    match current {
        None => true,
        Some((best_distance, best_dataset, best_layer)) => {
            let priority = |d: DatasetKind| {
                DatasetKind::DOWNLOAD_PRIORITY
                    .iter()
                    .position(|&p| p == d)
                    .unwrap_or(usize::MAX)
            };
            (distance, priority(dataset), layer)
                < (best_distance, priority(best_dataset), best_layer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_notify_before_wait_is_not_lost() {
        let signal = WorkSignal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        // Consumed; the next wait times out.
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_wakes_waiter_across_threads() {
        let signal = Arc::new(WorkSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        signal.notify();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_candidate_ordering() {
        // Closer always wins.
        assert!(better_candidate(
            Some((100.0, DatasetKind::Imagery, 0)),
            50.0,
            DatasetKind::ElevationGrid,
            3,
        ));
        // Equal distance: imagery beats mesh.
        assert!(better_candidate(
            Some((100.0, DatasetKind::ElevationMesh, 0)),
            100.0,
            DatasetKind::Imagery,
            0,
        ));
        // Equal distance and dataset: coarser layer wins.
        assert!(better_candidate(
            Some((100.0, DatasetKind::Imagery, 2)),
            100.0,
            DatasetKind::Imagery,
            1,
        ));
        assert!(!better_candidate(
            Some((100.0, DatasetKind::Imagery, 1)),
            100.0,
            DatasetKind::Imagery,
            2,
        ));
    }
}
