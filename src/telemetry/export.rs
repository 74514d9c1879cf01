//! Metrics export functionality for various formats.

use super::metrics::MetricsSnapshot;
use crate::error::{Error, Result};
use std::path::PathBuf;

/// Trait for exporting metrics to different formats
pub trait MetricsExporter: Send + Sync {
    /// Write one snapshot.
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes each snapshot as pretty-printed JSON to a file.
#[derive(Debug)]
pub struct JsonExporter {
    output_path: PathBuf,
}

impl JsonExporter {
    /// Exporter writing to `output_path`, replacing its contents.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let serializable = SerializableSnapshot::from(snapshot);
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| Error::telemetry(format!("JSON serialization failed: {}", e)))?;

        std::fs::write(&self.output_path, json)
            .map_err(|e| Error::telemetry(format!("Failed to write file: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    runs: u64,
    failed_runs: u64,
    success_rate: f64,
    bands_dispatched: u64,
    bytes_read_back: u64,
    read_back_mb_per_sec: f64,
    avg_band_latency_us: f64,
    p50_band_latency_us: f64,
    p95_band_latency_us: f64,
    p99_band_latency_us: f64,
    max_band_latency_us: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            runs: snapshot.runs,
            failed_runs: snapshot.failed_runs,
            success_rate: snapshot.success_rate(),
            bands_dispatched: snapshot.bands_dispatched,
            bytes_read_back: snapshot.bytes_read_back,
            read_back_mb_per_sec: snapshot.bytes_per_second() / (1024.0 * 1024.0),
            avg_band_latency_us: snapshot.avg_band_latency_ns as f64 / 1_000.0,
            p50_band_latency_us: snapshot.p50_band_latency_ns as f64 / 1_000.0,
            p95_band_latency_us: snapshot.p95_band_latency_ns as f64 / 1_000.0,
            p99_band_latency_us: snapshot.p99_band_latency_ns as f64 / 1_000.0,
            max_band_latency_us: snapshot.max_band_latency_ns as f64 / 1_000.0,
        }
    }
}

/// Export metrics to console (stdout)
/// Prints a summary to stdout; `verbose` adds the latency percentiles.
#[derive(Debug)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    /// Console exporter.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== Strata Dispatch Metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!("Runs: {} ({} failed)", snapshot.runs, snapshot.failed_runs);
        println!("Bands dispatched: {}", snapshot.bands_dispatched);
        println!(
            "Read back: {:.2}MB",
            snapshot.bytes_read_back as f64 / (1024.0 * 1024.0)
        );

        if self.verbose {
            println!("\nBand latency:");
            println!(
                "  Average: {:.2}μs",
                snapshot.avg_band_latency_ns as f64 / 1_000.0
            );
            println!("  P50: {:.2}μs", snapshot.p50_band_latency_ns as f64 / 1_000.0);
            println!("  P95: {:.2}μs", snapshot.p95_band_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", snapshot.p99_band_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", snapshot.max_band_latency_ns as f64 / 1_000.0);
        }

        println!("===============================");

        Ok(())
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        Self::new(false)
    }
}
