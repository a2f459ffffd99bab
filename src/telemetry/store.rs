//! In-process metrics storage.
//!
//! Mirrors what is reported through the `metrics` facade so a host without
//! an exporter installed can still snapshot kernel-layer counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Summary of byte-size observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

struct HistogramData {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    fn to_summary(&self) -> HistogramSummary {
        let count = self.count.load(Ordering::Relaxed);
        HistogramSummary {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min: if count == 0 { 0 } else { self.min.load(Ordering::Relaxed) },
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe counter and histogram store.
///
/// Keys are `name` or `name{label=value,...}`, matching what the facade
/// would export.
#[derive(Default)]
pub struct MetricsStore {
    counters: DashMap<String, AtomicU64>,
    histograms: DashMap<String, HistogramData>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, key: &str, value: u64) {
        if let Some(counter) = self.counters.get(key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn record_histogram(&self, key: &str, value: u64) {
        if let Some(histogram) = self.histograms.get(key) {
            histogram.record(value);
            return;
        }
        self.histograms
            .entry(key.to_string())
            .or_insert_with(HistogramData::new)
            .record(value);
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), e.value().to_summary()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_key() {
        let store = MetricsStore::new();
        store.increment_counter("launches{kernel=gemm}", 1);
        store.increment_counter("launches{kernel=gemm}", 2);
        store.increment_counter("launches{kernel=relu}", 1);

        let snap = store.snapshot();
        assert_eq!(snap.counter("launches{kernel=gemm}"), 3);
        assert_eq!(snap.counter("launches{kernel=relu}"), 1);
        assert_eq!(snap.counter("launches{kernel=conv}"), 0);
    }

    #[test]
    fn histogram_tracks_bounds() {
        let store = MetricsStore::new();
        for v in [512, 64, 4096] {
            store.record_histogram("scratch_bytes", v);
        }
        let summary = store.snapshot().histograms["scratch_bytes"];
        assert_eq!(
            summary,
            HistogramSummary {
                count: 3,
                sum: 4672,
                min: 64,
                max: 4096
            }
        );
    }

    #[test]
    fn snapshot_serializes() {
        let store = MetricsStore::new();
        store.increment_counter("completions", 1);
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        assert!(json.contains("\"completions\":1"));
    }
}
