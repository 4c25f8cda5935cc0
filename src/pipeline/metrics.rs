// src/pipeline/metrics.rs
//
// Run counters shared between the junction loop and the road workers.
// Summarised in the shutdown log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct JunctionMetrics {
    pub ticks: Arc<AtomicU64>,
    pub yellow_ticks: Arc<AtomicU64>,
    pub signal_changes: Arc<AtomicU64>,
    pub stale_statuses: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub empty_frames: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub records_written: Arc<AtomicU64>,
    pub record_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl JunctionMetrics {
    pub fn new() -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            yellow_ticks: Arc::new(AtomicU64::new(0)),
            signal_changes: Arc::new(AtomicU64::new(0)),
            stale_statuses: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            empty_frames: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            records_written: Arc::new(AtomicU64::new(0)),
            record_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tick_rate(&self) -> f64 {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            ticks as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_rate: self.tick_rate(),
            yellow_ticks: self.yellow_ticks.load(Ordering::Relaxed),
            signal_changes: self.signal_changes.load(Ordering::Relaxed),
            stale_statuses: self.stale_statuses.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            empty_frames: self.empty_frames.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for JunctionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub ticks: u64,
    pub tick_rate: f64,
    pub yellow_ticks: u64,
    pub signal_changes: u64,
    pub stale_statuses: u64,
    pub frames_processed: u64,
    pub empty_frames: u64,
    pub detector_failures: u64,
    pub records_written: u64,
    pub record_failures: u64,
    pub elapsed_secs: f64,
}
