//! Self-instrumentation of the query pipeline.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

/// Well-known counter and histogram names.
pub struct StatNames;

impl StatNames {
    pub const QUERIES_ISSUED: &'static str = "sigma.metrics.queries";
    pub const QUERY_FAILURES: &'static str = "sigma.metrics.query_failures";
    pub const PARSE_FAILURES: &'static str = "sigma.metrics.parse_failures";
    pub const METRICS_NOT_FOUND: &'static str = "sigma.metrics.not_found";
    pub const QUERY_LATENCY_MS: &'static str = "sigma.metrics.query_latency_ms";
}

/// Counters and latency histograms for the pipeline
#[derive(Default)]
pub struct PipelineStats {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by 1
    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, value: u64) {
        *lock(&self.counters).entry(name.to_string()).or_insert(0) += value;
    }

    /// Record a histogram value (e.g., latency)
    pub fn record_histogram(&self, name: &str, value: f64) {
        lock(&self.histograms)
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        lock(&self.counters).get(name).copied().unwrap_or(0)
    }

    pub fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        let histograms = lock(&self.histograms);
        let values = histograms.get(name)?;
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        let count = values.len();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        let p50 = sorted[count / 2];
        let p99 = sorted[((count as f64 * 0.99) as usize).min(count - 1)];
        Some(HistogramStats {
            count,
            sum,
            mean: sum / count as f64,
            p50,
            p99,
        })
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = lock(&self.counters).clone();
        let histograms = lock(&self.histograms)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        let histograms = histograms
            .into_iter()
            .filter_map(|name| self.get_histogram_stats(&name).map(|s| (name, s)))
            .collect();
        StatsSnapshot {
            counters,
            histograms,
        }
    }
}

/// Histogram statistics
#[derive(Debug, Clone, Serialize)]
pub struct HistogramStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub p50: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub counters: HashMap<String, u64>,
    pub histograms: HashMap<String, HistogramStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::new();
        stats.increment(StatNames::QUERIES_ISSUED);
        stats.increment(StatNames::QUERIES_ISSUED);
        stats.increment_by(StatNames::QUERY_FAILURES, 3);
        assert_eq!(stats.get_counter(StatNames::QUERIES_ISSUED), 2);
        assert_eq!(stats.get_counter(StatNames::QUERY_FAILURES), 3);
        assert_eq!(stats.get_counter("missing"), 0);
    }

    #[test]
    fn test_histogram() {
        let stats = PipelineStats::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            stats.record_histogram(StatNames::QUERY_LATENCY_MS, v);
        }
        let h = stats.get_histogram_stats(StatNames::QUERY_LATENCY_MS).unwrap();
        assert_eq!(h.count, 5);
        assert!((h.mean - 30.0).abs() < 0.001);
        assert_eq!(h.p50, 30.0);
        assert_eq!(h.p99, 50.0);
        assert!(stats.get_histogram_stats("none").is_none());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = PipelineStats::new();
        stats.increment(StatNames::METRICS_NOT_FOUND);
        stats.record_histogram(StatNames::QUERY_LATENCY_MS, 1.5);
        let snap = stats.snapshot();
        assert_eq!(snap.counters[StatNames::METRICS_NOT_FOUND], 1);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("query_latency_ms"));
    }
}
