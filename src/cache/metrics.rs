//! Cache Metrics
//!
//! Cache-line aligned counters kept by each Cache Store, the hit-rate
//! probe read by observability tooling, and Prometheus text rendering.

use crate::cache::storage::CachePartitions;
use crate::error::{Error, Result};
use chrono::Utc;
use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Store Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for one Cache Store, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct StoreMetrics {
    /// Lookups that found an entry
    pub hits: AtomicU64,
    /// Lookups that found nothing
    pub misses: AtomicU64,
    /// Entries stored
    pub puts: AtomicU64,
    /// Entries removed by invalidation
    pub removals: AtomicU64,
    /// Entries evicted for capacity or expiry
    pub evictions: AtomicU64,
    /// Populates refused because an invalidation raced with them
    pub rejected_populates: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<StoreMetrics>() <= CACHE_LINE_SIZE);

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            rejected_populates: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_removals(&self, count: u64) {
        self.removals.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_rejected_populate(&self) {
        self.rejected_populates.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Hits over total lookups, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected_populates: self.rejected_populates.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StoreMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removals: u64,
    pub evictions: u64,
    pub rejected_populates: u64,
}

impl StoreMetricsSnapshot {
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Hit-Rate Probe
// =============================================================================

/// Read-only view of per-partition hit rates
#[derive(Clone)]
pub struct HitRateProbe {
    partitions: CachePartitions,
}

impl HitRateProbe {
    pub fn new(partitions: CachePartitions) -> Self {
        Self { partitions }
    }

    /// Hit rate of a partition in `[0, 1]`; 0.0 for unknown partitions
    pub fn hit_rate(&self, partition: &str) -> f64 {
        self.partitions
            .get(partition)
            .map(|store| store.metrics().hit_rate())
            .unwrap_or(0.0)
    }

    /// Render every partition's counters in Prometheus text format
    pub fn render_prometheus(&self) -> Result<String> {
        let registry = Registry::new();
        let counters = IntGaugeVec::new(
            Opts::new("registry_cache_operations", "Cache store operation counters"),
            &["partition", "operation"],
        )
        .map_err(metrics_error)?;
        let entries = IntGaugeVec::new(
            Opts::new("registry_cache_entries", "Entries currently cached"),
            &["partition"],
        )
        .map_err(metrics_error)?;
        let hit_rate = GaugeVec::new(
            Opts::new("registry_cache_hit_rate", "Hits over total lookups"),
            &["partition"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(counters.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(entries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(hit_rate.clone()))
            .map_err(metrics_error)?;

        for (name, store) in self.partitions.all() {
            let snap = store.metrics().snapshot();
            for (operation, value) in [
                ("hit", snap.hits),
                ("miss", snap.misses),
                ("put", snap.puts),
                ("removal", snap.removals),
                ("eviction", snap.evictions),
                ("rejected_populate", snap.rejected_populates),
            ] {
                counters
                    .with_label_values(&[name.as_str(), operation])
                    .set(value as i64);
            }
            entries.with_label_values(&[name.as_str()]).set(store.len() as i64);
            hit_rate.with_label_values(&[name.as_str()]).set(snap.hit_rate());
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {e}"))
}
