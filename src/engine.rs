//! The full render pipeline.
//!
//! [`Engine`] owns a backend and a [`Config`] and runs the stages in
//! dependency order: device enumeration, source read, context, program,
//! queues, partition, output buffer, dispatch. Every platform object lives
//! in a local of [`Engine::render`], so objects are released in reverse
//! creation order (buffer, queues, kernel and program, context) on every
//! exit path.

use crate::backend::ComputeBackend;
use crate::config::Config;
use crate::context::ComputeContext;
use crate::device::{enumerate, DeviceSet};
use crate::dispatch::{self, DispatchReport};
use crate::error::{Error, Result};
use crate::partition::partition;
use crate::program::{compile, KernelSource};
use crate::queue::QueuePool;
use crate::telemetry::{DispatchMetrics, MetricsSnapshot};
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span};

/// Host-owned output image: row-major, `bytes_per_pixel` bytes per pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct HostImage {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    data: Vec<u8>,
}

impl HostImage {
    /// Zero-filled image. Fails if the byte size overflows.
    pub fn new(width: usize, height: usize, bytes_per_pixel: usize) -> Result<Self> {
        let len = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(bytes_per_pixel))
            .ok_or_else(|| Error::config("image size overflows usize"))?;
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            data: vec![0u8; len],
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Row-major pixel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable row-major pixel bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Take the pixel bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes of one row, `None` past the last row.
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        let stride = self.width * self.bytes_per_pixel;
        let start = y.checked_mul(stride)?;
        let end = start.checked_add(stride)?;
        self.data.get(start..end)
    }

    /// Bytes of the pixel at `(x, y)`, `None` outside the image.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.bytes_per_pixel;
        self.data.get(start..start + self.bytes_per_pixel)
    }
}

impl fmt::Debug for HostImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .finish_non_exhaustive()
    }
}

/// Receives a completed image, e.g. to write it to a file.
pub trait ImageEncoder {
    /// Consume one finished image.
    fn encode(&mut self, image: &HostImage) -> Result<()>;
}

impl<F> ImageEncoder for F
where
    F: FnMut(&HostImage) -> Result<()>,
{
    fn encode(&mut self, image: &HostImage) -> Result<()> {
        self(image)
    }
}

/// Everything a successful render produced.
#[derive(Debug, Clone)]
pub struct Render {
    /// The assembled image.
    pub image: HostImage,
    /// Per-band outcome.
    pub report: DispatchReport,
    /// Devices the run was spread across, in band order.
    pub device_names: Vec<String>,
    /// True when the fallback class supplied the devices.
    pub fell_back: bool,
}

/// Runs the render pipeline on one backend.
pub struct Engine<B: ComputeBackend> {
    backend: B,
    config: Config,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl<B: ComputeBackend> Engine<B> {
    /// Validate `config` and bind it to `backend`.
    pub fn new(backend: B, config: Config) -> Result<Self> {
        config.validate()?;
        let metrics = config
            .telemetry_enabled()
            .then(|| Arc::new(DispatchMetrics::new()));
        Ok(Self {
            backend,
            config,
            metrics,
        })
    }

    /// The platform renders run on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The validated configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collector shared across runs, if telemetry is enabled.
    pub fn metrics(&self) -> Option<&Arc<DispatchMetrics>> {
        self.metrics.as_ref()
    }

    /// Current metrics; all zero when telemetry is disabled.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .as_ref()
            .map(|metrics| metrics.snapshot())
            .unwrap_or_default()
    }

    fn devices(&self) -> Result<DeviceSet<B::Device>> {
        enumerate(
            &self.backend,
            self.config.preferred_class,
            self.config.fallback_class,
            self.config.max_devices,
        )
    }

    /// Render the image across every enumerated device.
    pub fn render(&self) -> Result<HostImage> {
        self.render_with_report().map(|render| render.image)
    }

    /// Like [`render`](Self::render), also returning the dispatch report.
    pub fn render_with_report(&self) -> Result<Render> {
        let config = &self.config;
        let span = info_span!("render", width = config.width, height = config.height);
        let _enter = span.enter();

        let set = self.devices()?;
        let source = KernelSource::read(&config.kernel_path)?;

        let context = ComputeContext::create(&self.backend, &set.devices)?;
        let devices = context.query_devices()?;
        let infos = context.describe_devices()?;

        let kernel = compile(
            &context,
            &source,
            &config.entry_point,
            &config.build_options,
        )?;
        let queues = QueuePool::create(&context, &devices)?;
        let bands = partition(
            config.width,
            config.height,
            queues.len(),
            config.bytes_per_pixel,
            config.remainder_policy,
        )?;
        let mut image = HostImage::new(config.width, config.height, config.bytes_per_pixel)?;
        let buffer = context.create_buffer(image.as_bytes().len())?;

        let result = dispatch::run(
            &queues,
            &kernel,
            &buffer,
            &bands,
            image.as_bytes_mut(),
            self.metrics.as_deref(),
        );
        let report = result?;

        info!(
            devices = report.devices_used(),
            fell_back = set.fell_back,
            "render complete"
        );
        Ok(Render {
            image,
            report,
            device_names: infos.iter().map(ToString::to_string).collect(),
            fell_back: set.fell_back,
        })
    }

    /// Single-queue reference path: the first device renders the whole
    /// domain in one launch, followed by a blocking join and a full read.
    pub fn render_single(&self) -> Result<HostImage> {
        let config = &self.config;
        let span = info_span!("render_single", width = config.width, height = config.height);
        let _enter = span.enter();

        let set = self.devices()?;
        let source = KernelSource::read(&config.kernel_path)?;

        let context = ComputeContext::create(&self.backend, &set.devices)?;
        let devices = context.query_devices()?;
        let kernel = compile(
            &context,
            &source,
            &config.entry_point,
            &config.build_options,
        )?;
        let queues = QueuePool::create(&context, &devices[..1])?;
        let mut image = HostImage::new(config.width, config.height, config.bytes_per_pixel)?;
        let buffer = context.create_buffer(image.as_bytes().len())?;

        dispatch::run_blocking(
            &queues,
            &kernel,
            &buffer,
            [config.width, config.height],
            image.as_bytes_mut(),
        )?;
        Ok(image)
    }

    /// Render, then hand the finished image to `encoder`. The encoder is
    /// never called when the render fails.
    pub fn render_to<E: ImageEncoder + ?Sized>(&self, encoder: &mut E) -> Result<HostImage> {
        let image = self.render()?;
        encoder.encode(&image)?;
        Ok(image)
    }
}

impl<B: ComputeBackend> fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_image_accessors() {
        let mut image = HostImage::new(4, 2, 3).unwrap();
        assert_eq!(image.as_bytes().len(), 24);
        image.as_bytes_mut()[(4 + 1) * 3] = 9;

        assert_eq!(image.pixel(1, 1), Some(&[9, 0, 0][..]));
        assert_eq!(image.row(1).map(<[u8]>::len), Some(12));
        assert_eq!(image.pixel(4, 0), None);
        assert_eq!(image.row(2), None);
    }

    #[test]
    fn test_host_image_out_of_range_lookups() {
        let image = HostImage::new(4, 2, 3).unwrap();
        assert_eq!(image.row(usize::MAX), None);
        assert_eq!(image.row(usize::MAX / 12 + 1), None);
        assert_eq!(image.pixel(0, usize::MAX), None);
        assert_eq!(image.pixel(3, 2), None);
        assert_eq!(image.pixel(3, 1).map(<[u8]>::len), Some(3));
    }

    #[test]
    fn test_host_image_overflow() {
        assert!(HostImage::new(usize::MAX, 2, 3).is_err());
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let config = Config {
            width: 0,
            ..Config::default()
        };
        let err = Engine::new(crate::backend::HostBackend::default(), config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
