//! Pipeline telemetry.
//!
//! Lock-free atomic counters incremented by the workers, with a
//! point-in-time [`MetricsSnapshot`] for display or assertions. Counters
//! never block the pipeline; readers may observe values mid-update, which
//! is fine for observability purposes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the download/decode pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    downloads_started: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    downloads_not_found: AtomicU64,
    tiers_decoded: AtomicU64,
    decode_failures: AtomicU64,
    slots_evicted: AtomicU64,
    records_swept: AtomicU64,
}

impl PipelineMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// A download left the `NotRequested` state.
    pub fn download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A download produced bytes.
    pub fn download_completed(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A download failed with a transient error.
    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A download failed because the stream does not exist.
    pub fn download_not_found(&self) {
        self.downloads_not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// One resolution tier (or one elevation payload) finished decoding.
    pub fn tier_decoded(&self) {
        self.tiers_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// A decode attempt failed (corruption or resource exhaustion).
    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Pool slots reclaimed by the eviction manager.
    pub fn slots_evicted(&self, count: u64) {
        self.slots_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Records removed by the idle sweep.
    pub fn records_swept(&self, count: u64) {
        self.records_swept.fetch_add(count, Ordering::Relaxed);
    }

    /// Takes a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            downloads_not_found: self.downloads_not_found.load(Ordering::Relaxed),
            tiers_decoded: self.tiers_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            slots_evicted: self.slots_evicted.load(Ordering::Relaxed),
            records_swept: self.records_swept.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub downloads_started: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub downloads_not_found: u64,
    pub tiers_decoded: u64,
    pub decode_failures: u64,
    pub slots_evicted: u64,
    pub records_swept: u64,
}
