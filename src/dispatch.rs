//! Per-device submission and collection.
//!
//! Every band is submitted to its own queue as a kernel launch followed by
//! a non-blocking read of the band's bytes into the matching range of the
//! host image. Submission is serial on the calling thread; execution is
//! concurrent across devices. The call returns only after every queue has
//! been joined, on success and on failure alike, because in-flight reads
//! still target the host image until their queue drains.

use crate::backend::ComputeBackend;
use crate::context::OutputBuffer;
use crate::error::{Error, Operation, Result};
use crate::partition::Band;
use crate::program::CompiledKernel;
use crate::queue::{DeviceQueue, QueuePool};
use crate::telemetry::DispatchMetrics;
use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandReport {
    /// Queue index the band ran on.
    pub device: usize,
    /// Rows in the band.
    pub rows: usize,
    /// Bytes of the image the band covers.
    pub byte_range: Range<usize>,
    /// From the start of submission until the band's queue reported that
    /// it drained. Queues are joined in parallel, so a fast band is not
    /// charged for a slower band ahead of it. Zero for bands that had no
    /// rows and were not submitted.
    pub latency: Duration,
    /// Whether the band was sent to its queue.
    pub submitted: bool,
}

/// Outcome of a whole dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// One entry per band, in band order.
    pub bands: Vec<BandReport>,
    /// From the first submission until every queue was joined.
    pub elapsed: Duration,
}

impl DispatchReport {
    /// Bytes copied back from submitted bands.
    pub fn bytes_read_back(&self) -> usize {
        self.bands
            .iter()
            .filter(|band| band.submitted)
            .map(|band| band.byte_range.len())
            .sum()
    }

    /// Bands that were actually submitted.
    pub fn devices_used(&self) -> usize {
        self.bands.iter().filter(|band| band.submitted).count()
    }
}

// Joins every queue of the pool when dropped, so no read can outlive the
// host slice it writes into, even if the caller unwinds.
struct JoinGuard<'p, 'c, B: ComputeBackend> {
    queues: &'p QueuePool<'c, B>,
    armed: bool,
}

impl<'p, 'c, B: ComputeBackend> JoinGuard<'p, 'c, B> {
    fn new(queues: &'p QueuePool<'c, B>) -> Self {
        Self {
            queues,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<B: ComputeBackend> Drop for JoinGuard<'_, '_, B> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.queues.finish_all();
        }
    }
}

fn check_layout(queues: usize, bands: &[Band], image_len: usize, buffer_len: usize) -> Result<()> {
    if bands.len() != queues {
        return Err(Error::config(format!(
            "{} bands for {} queues",
            bands.len(),
            queues
        )));
    }
    let mut expected = 0;
    for band in bands {
        if band.byte_offset != expected {
            return Err(Error::config(format!(
                "band {} starts at byte {}, expected {}",
                band.index, band.byte_offset, expected
            )));
        }
        expected += band.byte_len;
    }
    if expected != image_len || image_len != buffer_len {
        return Err(Error::config(format!(
            "bands cover {} bytes, host image is {} bytes, device buffer is {} bytes",
            expected, image_len, buffer_len
        )));
    }
    Ok(())
}

fn submit<B: ComputeBackend>(
    backend: &B,
    queue: &DeviceQueue<B>,
    kernel: &CompiledKernel<'_, B>,
    buffer: &OutputBuffer<'_, B>,
    band: &Band,
    dst: &mut [u8],
) -> Result<()> {
    let device = queue.index();

    backend
        .set_buffer_arg(kernel.raw(), 0, buffer.raw())
        .map_err(|status| {
            Error::from_status(Operation::SetKernelArg, status, |status| {
                Error::ArgumentBindingFailed { device, status }
            })
        })?;

    backend
        .enqueue_kernel(queue.raw(), kernel.raw(), band.offset, band.extent)
        .map_err(|status| {
            Error::from_status(Operation::EnqueueKernel, status, |status| {
                Error::DispatchFailed { device, status }
            })
        })?;

    // SAFETY: `dst` is a disjoint sub-slice of the host image borrowed for
    // the whole of `run`, and `run` joins this queue before returning or
    // unwinding.
    let read = unsafe { backend.enqueue_read(queue.raw(), buffer.raw(), band.byte_offset, dst) };
    read.map_err(|status| {
        Error::from_status(Operation::EnqueueRead, status, |status| {
            Error::ReadbackFailed { device, status }
        })
    })?;

    debug!(
        device,
        rows = band.rows(),
        first_row = band.offset[1],
        bytes = band.byte_len,
        "band submitted"
    );
    Ok(())
}

/// Launch `kernel` over every band and read each band back into `image`.
///
/// `bands[i]` runs on the `i`-th queue of `queues`. Bands with no rows are
/// skipped. The first submission failure stops further submissions; the
/// queues that already received work are still joined before the error is
/// returned. With no submission failure, the first join failure wins.
pub fn run<B: ComputeBackend>(
    queues: &QueuePool<'_, B>,
    kernel: &CompiledKernel<'_, B>,
    buffer: &OutputBuffer<'_, B>,
    bands: &[Band],
    image: &mut [u8],
    metrics: Option<&DispatchMetrics>,
) -> Result<DispatchReport> {
    check_layout(queues.len(), bands, image.len(), buffer.len())?;

    let backend = queues.backend();
    let start = Instant::now();
    let mut guard = JoinGuard::new(queues);

    let mut rest: &mut [u8] = image;
    let mut submitted = vec![false; bands.len()];
    let mut failure = None;

    for ((band, queue), sent) in bands.iter().zip(queues.iter()).zip(submitted.iter_mut()) {
        let (dst, tail) = std::mem::take(&mut rest).split_at_mut(band.byte_len);
        rest = tail;

        if band.is_empty() {
            debug!(device = queue.index(), "band has no rows, not submitted");
            continue;
        }
        if let Err(err) = submit(backend, queue, kernel, buffer, band, dst) {
            failure = Some(err);
            break;
        }
        *sent = true;
    }

    let joins = join_concurrently(queues, &submitted, failure.is_some());

    let mut reports = Vec::with_capacity(bands.len());
    for ((band, queue), (&sent, (joined, completed))) in bands
        .iter()
        .zip(queues.iter())
        .zip(submitted.iter().zip(joins))
    {
        if let Err(err) = joined {
            failure.get_or_insert(err);
        }
        let latency = match completed {
            Some(at) if sent => at.saturating_duration_since(start),
            _ => Duration::ZERO,
        };
        reports.push(BandReport {
            device: queue.index(),
            rows: band.rows(),
            byte_range: band.byte_range(),
            latency,
            submitted: sent,
        });
    }
    guard.disarm();

    if let Some(err) = failure {
        warn!(error = %err, "dispatch failed");
        if let Some(metrics) = metrics {
            metrics.record_run(false);
        }
        return Err(err);
    }

    let report = DispatchReport {
        bands: reports,
        elapsed: start.elapsed(),
    };
    if let Some(metrics) = metrics {
        for band in report.bands.iter().filter(|band| band.submitted) {
            metrics.record_band(band.latency, band.byte_range.len());
        }
        metrics.record_run(true);
    }
    info!(
        devices = report.devices_used(),
        bytes = report.bytes_read_back(),
        elapsed_us = report.elapsed.as_micros() as u64,
        "dispatch complete"
    );
    Ok(report)
}

// Join every queue that may hold work, each on its own thread, and note
// when each one drained. After a partial submission the queue that failed
// may still hold the kernel launch, so every queue is joined.
fn join_concurrently<B: ComputeBackend>(
    queues: &QueuePool<'_, B>,
    submitted: &[bool],
    partial: bool,
) -> Vec<(Result<()>, Option<Instant>)> {
    thread::scope(|scope| {
        let handles: Vec<_> = queues
            .iter()
            .zip(submitted)
            .map(|(queue, &sent)| {
                (sent || partial).then(|| {
                    scope.spawn(move || {
                        let joined = queues.finish(queue);
                        (joined, Some(Instant::now()))
                    })
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
                None => (Ok(()), None),
            })
            .collect()
    })
}

/// Reference path: one queue, the whole domain as a single launch, a
/// blocking join, then one full read.
pub fn run_blocking<B: ComputeBackend>(
    queues: &QueuePool<'_, B>,
    kernel: &CompiledKernel<'_, B>,
    buffer: &OutputBuffer<'_, B>,
    extent: [usize; 2],
    image: &mut [u8],
) -> Result<()> {
    let queue = queues
        .get(0)
        .ok_or_else(|| Error::config("reference path needs one queue"))?;
    if image.len() != buffer.len() {
        return Err(Error::config(format!(
            "host image is {} bytes, device buffer is {} bytes",
            image.len(),
            buffer.len()
        )));
    }

    let backend = queues.backend();
    let device = queue.index();
    let mut guard = JoinGuard::new(queues);

    backend
        .set_buffer_arg(kernel.raw(), 0, buffer.raw())
        .map_err(|status| {
            Error::from_status(Operation::SetKernelArg, status, |status| {
                Error::ArgumentBindingFailed { device, status }
            })
        })?;
    backend
        .enqueue_kernel(queue.raw(), kernel.raw(), [0, 0], extent)
        .map_err(|status| {
            Error::from_status(Operation::EnqueueKernel, status, |status| {
                Error::DispatchFailed { device, status }
            })
        })?;
    queues.finish(queue)?;

    // SAFETY: the queue is joined right after, and by the guard on error.
    let read = unsafe { backend.enqueue_read(queue.raw(), buffer.raw(), 0, image) };
    read.map_err(|status| {
        Error::from_status(Operation::EnqueueRead, status, |status| {
            Error::ReadbackFailed { device, status }
        })
    })?;
    queues.finish(queue)?;

    guard.disarm();
    Ok(())
}
