//! Dispatch telemetry.
//!
//! Provides band latency and throughput collection plus exporters. With
//! the `telemetry` feature disabled, a no-op collector keeps the same API.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{DispatchMetrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    //! No-op collector.

    use std::time::Duration;

    /// Discards everything it is given.
    #[derive(Debug, Clone, Default)]
    pub struct DispatchMetrics;

    impl DispatchMetrics {
        /// An empty collector.
        pub fn new() -> Self {
            Self
        }
        /// Ignored.
        pub fn record_band(&self, _: Duration, _: usize) {}
        /// Ignored.
        pub fn record_run(&self, _: bool) {}
        /// Always the default snapshot.
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
        /// Nothing to reset.
        pub fn reset(&self) {}
    }

    /// Always zero.
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
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{DispatchMetrics, MetricsSnapshot};
