//! Download worker loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{better_candidate, WorkSignal};
use crate::cache::{DatasetKind, TileCacheTable, TileRecord};
use crate::config::PipelineConfig;
use crate::context::ViewContext;
use crate::fetch::{FetchError, FetchRequest, TileFetcher};
use crate::telemetry::PipelineMetrics;

pub(super) struct DownloadWorker {
    pub table: Arc<TileCacheTable>,
    pub ctx: Arc<ViewContext>,
    pub fetcher: Arc<dyn TileFetcher>,
    pub metrics: Arc<PipelineMetrics>,
    pub signal: Arc<WorkSignal>,
    pub decode_signal: Arc<WorkSignal>,
    pub config: PipelineConfig,
    pub stop: Arc<std::sync::atomic::AtomicBool>,
}

impl DownloadWorker {
    pub fn run(self) {
        info!("download worker running");
        while !self.stop.load(Ordering::Acquire) {
            match self.select() {
                Some((record, dataset)) => self.download(&record, dataset),
                None => {
                    self.signal.wait_timeout(self.config.download_wait);
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                    // Retry window: transient failures become requestable
                    // again, deferred decodes become selectable again, and
                    // idle records age out.
                    if self.table.reset_transient_failures() > 0 {
                        self.decode_signal.notify();
                    }
                    let swept = self.table.sweep(self.config.max_idle);
                    if swept > 0 {
                        self.metrics.records_swept(swept as u64);
                    }
                }
            }
        }
        info!("download worker stopped");
    }

    /// Picks the next stream to fetch: datasets in priority order, and
    /// within a dataset the record nearest the viewpoint, coarser layers
    /// winning ties.
    pub(super) fn select(&self) -> Option<(Arc<TileRecord>, DatasetKind)> {
        let records = self.table.all();
        for &dataset in &DatasetKind::DOWNLOAD_PRIORITY {
            let mut best: Option<(f64, Arc<TileRecord>)> = None;
            for record in &records {
                if !self.eligible(record, dataset) {
                    continue;
                }
                let distance = self.ctx.distance_to(record.key);
                let current = best
                    .as_ref()
                    .map(|(d, r)| (*d, dataset, r.key.layer));
                if better_candidate(current, distance, dataset, record.key.layer) {
                    best = Some((distance, Arc::clone(record)));
                }
            }
            if let Some((_, record)) = best {
                return Some((record, dataset));
            }
        }
        None
    }

    fn eligible(&self, record: &TileRecord, dataset: DatasetKind) -> bool {
        if !record.stream(dataset).wants_download() {
            return false;
        }
        match dataset {
            DatasetKind::Imagery => true,
            DatasetKind::ElevationMesh => self.layer_has_elevation(record),
            // The grid is the fallback: it only becomes eligible once the
            // mesh stream for the same tile has failed.
            DatasetKind::ElevationGrid => {
                self.layer_has_elevation(record)
                    && record.stream(DatasetKind::ElevationMesh).is_failed()
            }
        }
    }

    fn layer_has_elevation(&self, record: &TileRecord) -> bool {
        self.ctx
            .layers()
            .get(record.key.layer)
            .map(|l| l.has_elevation)
            .unwrap_or(false)
    }

    pub(super) fn download(&self, record: &TileRecord, dataset: DatasetKind) {
        let stream = record.stream(dataset);
        if !stream.begin_download() {
            return;
        }
        self.metrics.download_started();
        debug!(key = %record.key, %dataset, "download started");

        let request = FetchRequest::whole(record.key, dataset);
        match self.fetcher.fetch(&request) {
            Ok(bytes) => {
                debug!(key = %record.key, %dataset, len = bytes.len(), "download complete");
                stream.complete_download(bytes);
                self.metrics.download_completed();
                self.decode_signal.notify();
            }
            Err(FetchError::NotFound) => {
                debug!(key = %record.key, %dataset, "stream not found");
                stream.fail_download(true);
                self.metrics.download_not_found();
            }
            Err(FetchError::Transient(reason)) => {
                warn!(key = %record.key, %dataset, %reason, "download failed");
                stream.fail_download(false);
                self.metrics.download_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use bytes::Bytes;
    use parking_lot::Mutex as PlMutex;

    use crate::cache::StreamState;
    use crate::context::Viewpoint;
    use crate::coord::{LayerGeometry, LayerSet, TileKey};

    /// Fetcher that records request order and answers from a script.
    struct ScriptedFetcher {
        calls: PlMutex<Vec<(TileKey, DatasetKind)>>,
        response: Result<Bytes, FetchError>,
    }

    impl ScriptedFetcher {
        fn ok() -> Self {
            Self {
                calls: PlMutex::new(Vec::new()),
                response: Ok(Bytes::from_static(&[1, 2, 3])),
            }
        }
    }

    impl TileFetcher for ScriptedFetcher {
        fn fetch(&self, request: &FetchRequest) -> Result<Bytes, FetchError> {
            self.calls.lock().push((request.key, request.dataset));
            self.response.clone()
        }
    }

    fn layers() -> LayerSet {
        LayerSet::new(vec![
            LayerGeometry { tile_size: 40_000, has_elevation: false },
            LayerGeometry { tile_size: 20_000, has_elevation: false },
            LayerGeometry { tile_size: 10_000, has_elevation: true },
        ])
    }

    fn worker(viewpoint: Viewpoint) -> (DownloadWorker, Arc<ScriptedFetcher>) {
        worker_with(viewpoint, ScriptedFetcher::ok())
    }

    fn worker_with(
        viewpoint: Viewpoint,
        fetcher: ScriptedFetcher,
    ) -> (DownloadWorker, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        let worker = DownloadWorker {
            table: Arc::new(TileCacheTable::new()),
            ctx: ViewContext::new(layers(), viewpoint),
            fetcher: fetcher.clone(),
            metrics: Arc::new(PipelineMetrics::new()),
            signal: Arc::new(WorkSignal::new()),
            decode_signal: Arc::new(WorkSignal::new()),
            config: PipelineConfig::default(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        (worker, fetcher)
    }

    #[test]
    fn test_nearest_tile_is_selected_first() {
        // Viewpoint just off the center of the layer-2 tile at
        // (100000, 50000); the other candidates sit several tiles away.
        let (worker, _) = worker(Viewpoint::new(103_000.0, 47_000.0, f64::MAX));
        let near = TileKey::new(2, 100_000, 50_000);
        worker.table.get_or_create(TileKey::new(2, 150_000, 50_000));
        worker.table.get_or_create(near);
        worker.table.get_or_create(TileKey::new(2, 100_000, -10_000));

        let (record, dataset) = worker.select().unwrap();
        assert_eq!(record.key, near);
        assert_eq!(dataset, DatasetKind::Imagery);
    }

    #[test]
    fn test_selection_order_is_distance_sorted() {
        let (worker, fetcher) = worker(Viewpoint::new(0.0, 0.0, f64::MAX));
        // Layer 1 carries no elevation, so only imagery is fetched.
        let keys = [
            TileKey::new(1, 200_000, 0),
            TileKey::new(1, -20_000, 20_000),
            TileKey::new(1, 100_000, 0),
        ];
        for &key in &keys {
            worker.table.get_or_create(key);
        }

        while let Some((record, dataset)) = worker.select() {
            worker.download(&record, dataset);
        }

        let calls = fetcher.calls.lock();
        let order: Vec<TileKey> = calls.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![keys[1], keys[2], keys[0]]);
    }

    #[test]
    fn test_imagery_outranks_closer_elevation() {
        let (worker, _) = worker(Viewpoint::new(0.0, 0.0, f64::MAX));
        // Elevation-capable tile right under the viewpoint.
        let near = worker.table.get_or_create(TileKey::new(2, 0, 0));
        // Its imagery is already downloaded; only mesh remains.
        assert!(near.stream(DatasetKind::Imagery).begin_download());
        near.stream(DatasetKind::Imagery)
            .complete_download(Bytes::new());
        // A far tile still wants imagery.
        let far = TileKey::new(2, 500_000, 0);
        worker.table.get_or_create(far);

        let (record, dataset) = worker.select().unwrap();
        assert_eq!(record.key, far);
        assert_eq!(dataset, DatasetKind::Imagery);
    }

    #[test]
    fn test_grid_waits_for_mesh_failure() {
        let (worker, _) = worker(Viewpoint::new(0.0, 0.0, f64::MAX));
        let record = worker.table.get_or_create(TileKey::new(2, 0, 0));
        assert!(record.stream(DatasetKind::Imagery).begin_download());
        record
            .stream(DatasetKind::Imagery)
            .complete_download(Bytes::new());

        // Mesh outstanding: the grid must not be offered.
        let (_, dataset) = worker.select().unwrap();
        assert_eq!(dataset, DatasetKind::ElevationMesh);

        record.stream(DatasetKind::ElevationMesh).fail_download(true);
        let (_, dataset) = worker.select().unwrap();
        assert_eq!(dataset, DatasetKind::ElevationGrid);
    }

    #[test]
    fn test_elevation_skipped_on_flat_layers() {
        let (worker, _) = worker(Viewpoint::new(0.0, 0.0, f64::MAX));
        // Layer 0 has no elevation datasets.
        let record = worker.table.get_or_create(TileKey::new(0, 0, 0));
        assert!(record.stream(DatasetKind::Imagery).begin_download());
        record
            .stream(DatasetKind::Imagery)
            .complete_download(Bytes::new());

        assert!(worker.select().is_none());
    }

    #[test]
    fn test_download_outcomes_update_state() {
        let (worker, _) = worker(Viewpoint::new(0.0, 0.0, f64::MAX));
        let record = worker.table.get_or_create(TileKey::new(2, 0, 0));
        worker.download(&record, DatasetKind::Imagery);
        assert!(matches!(
            record.stream(DatasetKind::Imagery).state(),
            StreamState::Downloaded(_)
        ));
        assert_eq!(worker.metrics.snapshot().downloads_completed, 1);

        let (missing, _) = worker_with(
            Viewpoint::new(0.0, 0.0, f64::MAX),
            ScriptedFetcher {
                calls: PlMutex::new(Vec::new()),
                response: Err(FetchError::NotFound),
            },
        );
        let record = missing.table.get_or_create(TileKey::new(2, 0, 0));
        missing.download(&record, DatasetKind::Imagery);
        assert!(matches!(
            record.stream(DatasetKind::Imagery).state(),
            StreamState::Failed { not_found: true, .. }
        ));
        assert_eq!(missing.metrics.snapshot().downloads_not_found, 1);
    }
}
