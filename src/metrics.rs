// Engine metrics module
//
// Lightweight counters for scans, renames and persistence, shared by the
// engine components through an Arc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine-wide operation counters.
///
/// Uses atomic operations so components can record from any task without
/// locking.
#[derive(Debug)]
pub struct Metrics {
    /// Directory scans that hit the filesystem
    pub scans_performed: AtomicU64,

    /// Scans answered from the cache
    pub cache_hits: AtomicU64,

    /// Directory renames that succeeded
    pub renames_succeeded: AtomicU64,

    /// Rename attempts repeated because the directory was locked
    pub rename_retries: AtomicU64,

    /// Renames given up on
    pub renames_failed: AtomicU64,

    /// Total time spent in activation passes, in milliseconds
    pub total_activation_time_ms: AtomicU64,

    /// Activation passes completed
    pub activations: AtomicU64,

    /// Snapshots written
    pub snapshots_captured: AtomicU64,

    /// Canonical document writes (configurations and settings)
    pub store_writes: AtomicU64,

    /// Old backup or snapshot files removed by retention
    pub files_pruned: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_performed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            renames_succeeded: AtomicU64::new(0),
            rename_retries: AtomicU64::new(0),
            renames_failed: AtomicU64::new(0),
            total_activation_time_ms: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            snapshots_captured: AtomicU64::new(0),
            store_writes: AtomicU64::new(0),
            files_pruned: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_scan(&self) {
        self.scans_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename(&self) {
        self.renames_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename_retry(&self) {
        self.rename_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename_failed(&self) {
        self.renames_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed activation pass and its duration
    pub fn record_activation(&self, duration: Duration) {
        self.activations.fetch_add(1, Ordering::Relaxed);
        self.total_activation_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write(&self) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: usize) {
        self.files_pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of scans served from the cache, 0.0 when nothing was scanned
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.scans_performed.load(Ordering::Relaxed);
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Average activation time in milliseconds
    pub fn avg_activation_time_ms(&self) -> f64 {
        let total = self.total_activation_time_ms.load(Ordering::Relaxed);
        let count = self.activations.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Engine Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Scans: {} performed, {} cached ({:.0}% hit ratio)",
            self.scans_performed.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_hit_ratio() * 100.0
        );
        tracing::info!(
            "Renames: {} succeeded, {} retried, {} failed",
            self.renames_succeeded.load(Ordering::Relaxed),
            self.rename_retries.load(Ordering::Relaxed),
            self.renames_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Activations: {} (avg: {:.2}ms)",
            self.activations.load(Ordering::Relaxed),
            self.avg_activation_time_ms()
        );
        tracing::info!(
            "Snapshots: {}, store writes: {}, files pruned: {}",
            self.snapshots_captured.load(Ordering::Relaxed),
            self.store_writes.load(Ordering::Relaxed),
            self.files_pruned.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
