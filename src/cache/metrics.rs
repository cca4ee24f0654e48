//! Cache Metrics Collection
//!
//! Counters for monitoring the proxy: per-tier hits and misses, remote
//! fetch volume, single-flight collapsing, promotions, evictions and
//! prefetch outcomes. Snapshots serialize to JSON and render to the
//! Prometheus text exposition format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Tier 1 (memory)
    tier1_hits: AtomicU64,
    tier1_misses: AtomicU64,
    tier1_evictions: AtomicU64,
    tier1_entries: AtomicU64,

    // Tier 2 (persistent)
    tier2_hits: AtomicU64,
    tier2_misses: AtomicU64,
    tier2_evictions: AtomicU64,
    tier2_entries: AtomicU64,
    tier2_size_bytes: AtomicU64,
    storage_failures: AtomicU64,

    // Remote source
    remote_fetches: AtomicU64,
    remote_frames: AtomicU64,
    transparent_fetches: AtomicU64,
    oversize_chunks: AtomicU64,

    // Tier movement
    promotions: AtomicU64,

    // Prefetch
    prefetches_issued: AtomicU64,
    prefetches_failed: AtomicU64,

    // Remote fetch latency (microseconds, exponential moving average)
    fetch_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Tier 1
    pub fn record_tier1_hit(&self) {
        self.tier1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier1_miss(&self) {
        self.tier1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier1_evictions(&self, count: u64) {
        self.tier1_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn update_tier1_stats(&self, entries: u64) {
        self.tier1_entries.store(entries, Ordering::Relaxed);
    }

    pub fn tier1_hits(&self) -> u64 {
        self.tier1_hits.load(Ordering::Relaxed)
    }

    pub fn tier1_misses(&self) -> u64 {
        self.tier1_misses.load(Ordering::Relaxed)
    }

    // Tier 2
    pub fn record_tier2_hit(&self) {
        self.tier2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier2_miss(&self) {
        self.tier2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier2_eviction(&self) {
        self.tier2_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_tier2_stats(&self, entries: u64, size_bytes: u64) {
        self.tier2_entries.store(entries, Ordering::Relaxed);
        self.tier2_size_bytes.store(size_bytes, Ordering::Relaxed);
    }

    pub fn tier2_hits(&self) -> u64 {
        self.tier2_hits.load(Ordering::Relaxed)
    }

    pub fn tier2_misses(&self) -> u64 {
        self.tier2_misses.load(Ordering::Relaxed)
    }

    // Remote source
    pub fn record_remote_fetch(&self, frames: u64, latency: Duration) {
        self.remote_fetches.fetch_add(1, Ordering::Relaxed);
        self.remote_frames.fetch_add(frames, Ordering::Relaxed);
        self.update_latency_ema(&self.fetch_latency_us, latency);
    }

    pub fn record_transparent_fetch(&self) {
        self.transparent_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversize_chunk(&self) {
        self.oversize_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_fetches(&self) -> u64 {
        self.remote_fetches.load(Ordering::Relaxed)
    }

    // Tier movement
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    // Prefetch
    pub fn record_prefetch_issued(&self) {
        self.prefetches_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_failed(&self) {
        self.prefetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn fetch_latency(&self) -> Duration {
        Duration::from_micros(self.fetch_latency_us.load(Ordering::Relaxed))
    }

    /// Share of chunk lookups served by either tier
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.tier1_hits() + self.tier2_hits();
        let total = hits + self.tier2_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tier1_hits: self.tier1_hits(),
            tier1_misses: self.tier1_misses(),
            tier1_evictions: self.tier1_evictions.load(Ordering::Relaxed),
            tier1_entries: self.tier1_entries.load(Ordering::Relaxed),

            tier2_hits: self.tier2_hits(),
            tier2_misses: self.tier2_misses(),
            tier2_evictions: self.tier2_evictions.load(Ordering::Relaxed),
            tier2_entries: self.tier2_entries.load(Ordering::Relaxed),
            tier2_size_bytes: self.tier2_size_bytes.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),

            remote_fetches: self.remote_fetches(),
            remote_frames: self.remote_frames.load(Ordering::Relaxed),
            transparent_fetches: self.transparent_fetches.load(Ordering::Relaxed),
            // Filled in by the proxy from its fetch coordinator
            coalesced_fetches: 0,
            oversize_chunks: self.oversize_chunks.load(Ordering::Relaxed),

            promotions: self.promotions.load(Ordering::Relaxed),
            prefetches_issued: self.prefetches_issued.load(Ordering::Relaxed),
            prefetches_failed: self.prefetches_failed.load(Ordering::Relaxed),

            fetch_latency_us: self.fetch_latency().as_micros() as u64,
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    // Tier 1
    pub tier1_hits: u64,
    pub tier1_misses: u64,
    pub tier1_evictions: u64,
    pub tier1_entries: u64,

    // Tier 2
    pub tier2_hits: u64,
    pub tier2_misses: u64,
    pub tier2_evictions: u64,
    pub tier2_entries: u64,
    pub tier2_size_bytes: u64,
    pub storage_failures: u64,

    // Remote
    pub remote_fetches: u64,
    pub remote_frames: u64,
    pub transparent_fetches: u64,
    pub coalesced_fetches: u64,
    pub oversize_chunks: u64,

    // Movement and prefetch
    pub promotions: u64,
    pub prefetches_issued: u64,
    pub prefetches_failed: u64,

    // Overall
    pub fetch_latency_us: u64,
    pub overall_hit_ratio: f64,
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format
    pub fn export_prometheus(&self) -> Result<String> {
        let registry = Registry::new();

        let counters: [(&str, &str, u64); 15] = [
            ("tier1_hits_total", "Chunk lookups served by tier 1", self.tier1_hits),
            ("tier1_misses_total", "Chunk lookups missing tier 1", self.tier1_misses),
            ("tier1_evictions_total", "Chunks evicted from tier 1", self.tier1_evictions),
            ("tier2_hits_total", "Chunk lookups served by tier 2", self.tier2_hits),
            ("tier2_misses_total", "Chunk lookups missing tier 2", self.tier2_misses),
            ("tier2_evictions_total", "Chunks evicted from tier 2", self.tier2_evictions),
            ("storage_failures_total", "Persistent tier operations that failed", self.storage_failures),
            ("remote_fetches_total", "Requests issued to the frame source", self.remote_fetches),
            ("remote_frames_total", "Frames received from the frame source", self.remote_frames),
            ("transparent_fetches_total", "Single-frame fetches bypassing the cache", self.transparent_fetches),
            ("coalesced_fetches_total", "Misses served by a fetch already in flight", self.coalesced_fetches),
            ("oversize_chunks_total", "Chunks too large to cache in tier 2", self.oversize_chunks),
            ("promotions_total", "Chunks promoted from tier 2 to tier 1", self.promotions),
            ("prefetches_issued_total", "Background chunk prefetches started", self.prefetches_issued),
            ("prefetches_failed_total", "Background chunk prefetches that failed", self.prefetches_failed),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(format!("trajcache_{}", name), help).map_err(prom_err)?;
            counter.inc_by(value);
            registry.register(Box::new(counter)).map_err(prom_err)?;
        }

        let gauges: [(&str, &str, u64); 4] = [
            ("tier1_entries", "Chunks resident in tier 1", self.tier1_entries),
            ("tier2_entries", "Chunks resident in tier 2", self.tier2_entries),
            ("tier2_size_bytes", "Bytes accounted to tier 2", self.tier2_size_bytes),
            ("fetch_latency_microseconds", "Smoothed remote fetch latency", self.fetch_latency_us),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(format!("trajcache_{}", name), help).map_err(prom_err)?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge)).map_err(prom_err)?;
        }

        let ratio = Gauge::new("trajcache_hit_ratio", "Share of chunk lookups served by a tier")
            .map_err(prom_err)?;
        ratio.set(self.overall_hit_ratio);
        registry.register(Box::new(ratio)).map_err(prom_err)?;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prom_err(err: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", err))
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.tier1_hits(), 0);
        assert_eq!(metrics.tier2_hits(), 0);
        assert_eq!(metrics.remote_fetches(), 0);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_remote_fetch(10, Duration::from_micros(100));
        assert_eq!(metrics.fetch_latency(), Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_remote_fetch(10, Duration::from_micros(200));
        let latency = metrics.fetch_latency().as_micros();
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_overall_hit_ratio() {
        let metrics = CacheMetrics::new();

        metrics.record_tier1_hit();
        metrics.record_tier1_hit();
        metrics.record_tier2_hit();
        metrics.record_tier2_miss();

        assert!((metrics.overall_hit_ratio() - 0.75).abs() < 0.01);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_tier1_hit();
        metrics.record_promotion();
        metrics.record_prefetch_issued();
        metrics.record_tier1_evictions(2);
        metrics.update_tier2_stats(3, 4096);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tier1_hits, 1);
        assert_eq!(snapshot.promotions, 1);
        assert_eq!(snapshot.prefetches_issued, 1);
        assert_eq!(snapshot.tier1_evictions, 2);
        assert_eq!(snapshot.tier2_entries, 3);
        assert_eq!(snapshot.tier2_size_bytes, 4096);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = CacheMetrics::new();
        metrics.record_remote_fetch(100, Duration::from_millis(3));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["remote_fetches"], 1);
        assert_eq!(json["remote_frames"], 100);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = CacheMetrics::new();
        metrics.record_tier1_hit();
        metrics.update_tier2_stats(2, 1024);

        let text = metrics.snapshot().export_prometheus().unwrap();
        assert!(text.contains("trajcache_tier1_hits_total 1"));
        assert!(text.contains("trajcache_tier2_size_bytes 1024"));
        assert!(text.contains("# HELP trajcache_hit_ratio"));
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
