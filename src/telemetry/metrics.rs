//! Dispatch metrics.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// one hour in nanoseconds, 3 significant figures
const MAX_TRACKED_LATENCY_NS: u64 = 3_600_000_000_000;

/// Counters and latency distribution across dispatch runs.
#[derive(Debug)]
pub struct DispatchMetrics {
    runs: AtomicU64,
    failed_runs: AtomicU64,
    bands_dispatched: AtomicU64,
    bytes_read_back: AtomicU64,

    // band completion latency; `None` if the histogram could not be built
    band_latency: RwLock<Option<Histogram<u64>>>,

    start_time: Instant,
}

impl DispatchMetrics {
    /// An empty collector.
    pub fn new() -> Self {
        let histogram = Histogram::new_with_max(MAX_TRACKED_LATENCY_NS, 3).ok();

        Self {
            runs: AtomicU64::new(0),
            failed_runs: AtomicU64::new(0),
            bands_dispatched: AtomicU64::new(0),
            bytes_read_back: AtomicU64::new(0),
            band_latency: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    /// Record one band that completed and was read back.
    pub fn record_band(&self, latency: Duration, bytes: usize) {
        self.bands_dispatched.fetch_add(1, Ordering::Relaxed);
        self.bytes_read_back.fetch_add(bytes as u64, Ordering::Relaxed);

        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        if let Some(hist) = self.band_latency.write().as_mut() {
            let _ = hist.record(nanos.min(MAX_TRACKED_LATENCY_NS));
        }
    }

    /// Record the outcome of one render.
    pub fn record_run(&self, succeeded: bool) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed_runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current counters and latency percentiles.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.band_latency.read();
        let (avg, p50, p95, p99, max) = match histogram.as_ref() {
            Some(h) if h.len() > 0 => (
                h.mean() as u64,
                h.value_at_quantile(0.50),
                h.value_at_quantile(0.95),
                h.value_at_quantile(0.99),
                h.max(),
            ),
            _ => (0, 0, 0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            runs: self.runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            bands_dispatched: self.bands_dispatched.load(Ordering::Relaxed),
            bytes_read_back: self.bytes_read_back.load(Ordering::Relaxed),
            avg_band_latency_ns: avg,
            p50_band_latency_ns: p50,
            p95_band_latency_ns: p95,
            p99_band_latency_ns: p99,
            max_band_latency_ns: max,
        }
    }

    /// Zero all counters and the histogram.
    pub fn reset(&self) {
        self.runs.store(0, Ordering::Relaxed);
        self.failed_runs.store(0, Ordering::Relaxed);
        self.bands_dispatched.store(0, Ordering::Relaxed);
        self.bytes_read_back.store(0, Ordering::Relaxed);

        if let Some(hist) = self.band_latency.write().as_mut() {
            hist.reset();
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Time since the collector was created or reset.
    pub uptime: Duration,
    /// Renders attempted.
    pub runs: u64,
    /// Renders that returned an error.
    pub failed_runs: u64,
    /// Bands completed and read back.
    pub bands_dispatched: u64,
    /// Bytes read back across all bands.
    pub bytes_read_back: u64,
    /// Mean band latency.
    pub avg_band_latency_ns: u64,
    /// Median band latency.
    pub p50_band_latency_ns: u64,
    /// 95th percentile band latency.
    pub p95_band_latency_ns: u64,
    /// 99th percentile band latency.
    pub p99_band_latency_ns: u64,
    /// Slowest band.
    pub max_band_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Fraction of runs that completed (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        (self.runs - self.failed_runs) as f64 / self.runs as f64
    }

    /// Read-back throughput over the collector's lifetime
    pub fn bytes_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.bytes_read_back as f64 / seconds
    }
}
