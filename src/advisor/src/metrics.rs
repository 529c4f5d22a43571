//! Benchmark metrics tracking
//!
//! Atomic counters shared by every column task of a run.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe metrics for one benchmarking run
#[derive(Debug, Clone)]
pub struct BenchMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    columns_started: AtomicUsize,
    columns_benchmarked: AtomicUsize,
    columns_failed: AtomicUsize,
    candidates_measured: AtomicUsize,
    candidates_failed: AtomicUsize,
    objects_dropped: AtomicUsize,
    bytes_measured: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl Default for BenchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                columns_started: AtomicUsize::new(0),
                columns_benchmarked: AtomicUsize::new(0),
                columns_failed: AtomicUsize::new(0),
                candidates_measured: AtomicUsize::new(0),
                candidates_failed: AtomicUsize::new(0),
                objects_dropped: AtomicUsize::new(0),
                bytes_measured: AtomicU64::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_column_start(&self) {
        self.inner.columns_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a column that produced at least one measurement
    pub fn record_column_success(&self, duration: Duration) {
        self.inner
            .columns_benchmarked
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_column_failure(&self) {
        self.inner.columns_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_measurement(&self, bytes: u64) {
        self.inner
            .candidates_measured
            .fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_measured.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_candidate_failure(&self) {
        self.inner.candidates_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.inner.objects_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn columns_started(&self) -> usize {
        self.inner.columns_started.load(Ordering::Relaxed)
    }

    pub fn columns_benchmarked(&self) -> usize {
        self.inner.columns_benchmarked.load(Ordering::Relaxed)
    }

    pub fn columns_failed(&self) -> usize {
        self.inner.columns_failed.load(Ordering::Relaxed)
    }

    pub fn candidates_measured(&self) -> usize {
        self.inner.candidates_measured.load(Ordering::Relaxed)
    }

    pub fn candidates_failed(&self) -> usize {
        self.inner.candidates_failed.load(Ordering::Relaxed)
    }

    pub fn objects_dropped(&self) -> usize {
        self.inner.objects_dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_measured(&self) -> u64 {
        self.inner.bytes_measured.load(Ordering::Relaxed)
    }

    /// Average wall time of a successfully benchmarked column
    pub fn avg_column_duration_ms(&self) -> f64 {
        let total_ms = self.inner.total_duration_ms.load(Ordering::Relaxed) as f64;
        let columns = self.columns_benchmarked() as f64;

        if columns > 0.0 { total_ms / columns } else { 0.0 }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            columns_started: self.columns_started(),
            columns_benchmarked: self.columns_benchmarked(),
            columns_failed: self.columns_failed(),
            candidates_measured: self.candidates_measured(),
            candidates_failed: self.candidates_failed(),
            objects_dropped: self.objects_dropped(),
            bytes_measured: self.bytes_measured(),
            avg_column_duration_ms: self.avg_column_duration_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub columns_started: usize,
    pub columns_benchmarked: usize,
    pub columns_failed: usize,
    pub candidates_measured: usize,
    pub candidates_failed: usize,
    pub objects_dropped: usize,
    pub bytes_measured: u64,
    pub avg_column_duration_ms: f64,
}

impl MetricsSummary {
    fn format_mb(bytes: u64) -> String {
        format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
    }

    pub fn log(&self) {
        log::info!("=== Benchmark Summary ===");
        log::info!(
            "Columns: {} started, {} benchmarked, {} failed",
            self.columns_started,
            self.columns_benchmarked,
            self.columns_failed
        );
        log::info!(
            "Candidates: {} measured, {} skipped",
            self.candidates_measured,
            self.candidates_failed
        );
        log::info!(
            "Storage: {} MB materialized across {} dropped objects",
            Self::format_mb(self.bytes_measured),
            self.objects_dropped
        );
        log::info!(
            "Average column duration: {:.2}ms",
            self.avg_column_duration_ms
        );
    }
}
