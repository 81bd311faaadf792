//! Concurrent tile record table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::record::{StreamState, TileRecord};
use super::DatasetKind;
use crate::coord::TileKey;
use crate::dispatch::WorkSignal;

/// Maps tile keys to their records.
///
/// Reads come from the render consumer every frame; writes come from both
/// workers. Records are handed out as `Arc`s, so a record stays usable even
/// if the sweep removes it from the table mid-operation; its pool buffers
/// return to the free lists when the last holder drops it.
pub struct TileCacheTable {
    records: DashMap<TileKey, Arc<TileRecord>>,
    epoch: Instant,
    /// Woken on every `get_or_create`, so requested tiles download without
    /// waiting for the worker's timeout.
    download_signal: RwLock<Option<Arc<WorkSignal>>>,
}

impl Default for TileCacheTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCacheTable {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            epoch: Instant::now(),
            download_signal: RwLock::new(None),
        }
    }

    /// Hooks the download worker's wake signal into `get_or_create`.
    pub fn set_download_signal(&self, signal: Arc<WorkSignal>) {
        *self.download_signal.write() = Some(signal);
    }

    /// Milliseconds since the table was created; the time base for
    /// `last_request` stamps.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Returns the record for `key`, creating it on first request. Stamps
    /// the request time and wakes the download worker either way.
    pub fn get_or_create(&self, key: TileKey) -> Arc<TileRecord> {
        let now = self.now_ms();
        let record = self
            .records
            .entry(key)
            .or_insert_with(|| Arc::new(TileRecord::new(key, now)))
            .clone();
        record.touch(now);
        if let Some(signal) = &*self.download_signal.read() {
            signal.notify();
        }
        record
    }

    /// Returns the record for `key` if present, stamping the request time.
    pub fn get_if_exists(&self, key: TileKey) -> Option<Arc<TileRecord>> {
        let record = self.records.get(&key).map(|r| r.clone())?;
        record.touch(self.now_ms());
        Some(record)
    }

    /// Snapshot of all records, for the workers' selection scans.
    pub fn all(&self) -> Vec<Arc<TileRecord>> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes records idle for longer than `max_idle`, returning how many
    /// were dropped. Records with an in-flight download are spared so the
    /// single-flight accounting stays simple.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = self.now_ms();
        let cutoff = max_idle.as_millis() as u64;
        let before = self.records.len();
        self.records.retain(|_, record| {
            let idle = now.saturating_sub(record.last_request_ms());
            if idle <= cutoff {
                return true;
            }
            let downloading = DatasetKind::DOWNLOAD_PRIORITY.iter().any(|&d| {
                matches!(record.stream(d).state(), StreamState::Downloading)
            });
            if downloading {
                return true;
            }
            debug!(key = %record.key, idle_ms = idle, "sweeping idle record");
            false
        });
        before - self.records.len()
    }

    /// Makes transient failures requestable again across the whole table.
    /// Runs on the download worker's retry-reset window.
    pub fn reset_transient_failures(&self) -> usize {
        let mut reset = 0;
        for record in self.records.iter() {
            for &dataset in &DatasetKind::DOWNLOAD_PRIORITY {
                if record.stream(dataset).reset_transient_failure() {
                    reset += 1;
                }
            }
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let table = TileCacheTable::new();
        let key = TileKey::new(1, 10_000, -20_000);
        let a = table.get_or_create(key);
        let b = table.get_or_create(key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_or_create_wakes_download_signal() {
        let table = TileCacheTable::new();
        let signal = Arc::new(WorkSignal::new());
        table.set_download_signal(Arc::clone(&signal));

        table.get_or_create(TileKey::new(0, 0, 0));
        assert!(signal.wait_timeout(Duration::from_millis(1)));

        // Re-requests wake too; an invalidated stream must not wait out
        // the worker's idle timeout.
        table.get_or_create(TileKey::new(0, 0, 0));
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_get_if_exists_does_not_create() {
        let table = TileCacheTable::new();
        assert!(table.get_if_exists(TileKey::new(0, 0, 0)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_idle_records() {
        let table = TileCacheTable::new();
        let stale = table.get_or_create(TileKey::new(0, 0, 0));
        stale.touch(0);
        let fresh = table.get_or_create(TileKey::new(0, 10_000, 0));

        std::thread::sleep(Duration::from_millis(5));
        fresh.touch(table.now_ms());
        let swept = table.sweep(Duration::from_millis(3));
        assert_eq!(swept, 1);
        assert!(table.get_if_exists(TileKey::new(0, 0, 0)).is_none());
    }

    #[test]
    fn test_sweep_spares_in_flight_downloads() {
        let table = TileCacheTable::new();
        let record = table.get_or_create(TileKey::new(0, 0, 0));
        record.touch(0);
        assert!(record.stream(DatasetKind::Imagery).begin_download());

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.sweep(Duration::from_millis(1)), 0);

        record
            .stream(DatasetKind::Imagery)
            .complete_download(Bytes::new());
        assert_eq!(table.sweep(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_reset_transient_failures_across_table() {
        let table = TileCacheTable::new();
        let a = table.get_or_create(TileKey::new(0, 0, 0));
        a.stream(DatasetKind::Imagery).fail_download(false);
        a.stream(DatasetKind::ElevationMesh).fail_download(true);

        assert_eq!(table.reset_transient_failures(), 1);
        assert!(a.stream(DatasetKind::Imagery).wants_download());
        assert!(a.stream(DatasetKind::ElevationMesh).is_failed());
    }
}
