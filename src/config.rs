//! Render configuration: image layout, kernel location, device selection.

use crate::device::DeviceClass;
use crate::error::{Error, Result};
use crate::partition::RemainderPolicy;
use std::path::PathBuf;

/// Kernel function looked up when none is configured.
pub const DEFAULT_ENTRY_POINT: &str = "render";
/// Kernel source read when no path is configured.
pub const DEFAULT_KERNEL_PATH: &str = "mandelbrot.cl";
/// One byte each for red, green and blue.
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Settings for one [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Config {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels, the axis bands are cut along.
    pub height: usize,
    /// Bytes each work item writes.
    pub bytes_per_pixel: usize,

    /// Kernel source file.
    pub kernel_path: PathBuf,
    /// Kernel function to launch.
    pub entry_point: String,
    /// Passed verbatim to the platform compiler.
    pub build_options: String,

    /// Class queried first.
    pub preferred_class: DeviceClass,
    /// Class queried when the preferred one is empty.
    pub fallback_class: DeviceClass,
    /// Upper bound on devices per class query; `None` means no cap.
    pub max_devices: Option<usize>,

    /// Where rows that do not divide evenly go.
    pub remainder_policy: RemainderPolicy,

    /// Collect band latency and throughput.
    #[cfg(feature = "telemetry")]
    pub enable_telemetry: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            bytes_per_pixel: RGB_BYTES_PER_PIXEL,

            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            build_options: String::new(),

            preferred_class: DeviceClass::Gpu,
            fallback_class: DeviceClass::Cpu,
            max_devices: None,

            remainder_policy: RemainderPolicy::default(),

            #[cfg(feature = "telemetry")]
            enable_telemetry: true,
        }
    }
}

impl Config {
    /// Builder starting from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config(format!(
                "image dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }

        if self.bytes_per_pixel == 0 {
            return Err(Error::config("bytes_per_pixel must be > 0"));
        }

        if self.output_len().is_none() {
            return Err(Error::config(format!(
                "{}x{}x{} bytes overflows the address space",
                self.width, self.height, self.bytes_per_pixel
            )));
        }

        if self.entry_point.trim().is_empty() {
            return Err(Error::config("entry_point must not be empty"));
        }

        if self.max_devices == Some(0) {
            return Err(Error::config("max_devices must be > 0"));
        }

        if self.preferred_class == self.fallback_class {
            return Err(Error::config(format!(
                "preferred and fallback device classes are both {}",
                self.preferred_class
            )));
        }

        Ok(())
    }

    /// Byte size of the output image, `None` on overflow.
    pub fn output_len(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.bytes_per_pixel)
    }

    #[cfg(feature = "telemetry")]
    pub(crate) fn telemetry_enabled(&self) -> bool {
        self.enable_telemetry
    }

    #[cfg(not(feature = "telemetry"))]
    pub(crate) fn telemetry_enabled(&self) -> bool {
        false
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Image size in pixels.
    pub fn dimensions(mut self, width: usize, height: usize) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Bytes each work item writes.
    pub fn bytes_per_pixel(mut self, bytes: usize) -> Self {
        self.config.bytes_per_pixel = bytes;
        self
    }

    /// Kernel source file.
    pub fn kernel_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.kernel_path = path.into();
        self
    }

    /// Kernel function to launch.
    pub fn entry_point<S: Into<String>>(mut self, name: S) -> Self {
        self.config.entry_point = name.into();
        self
    }

    /// Compiler flags, e.g. `-cl-fast-relaxed-math`.
    pub fn build_options<S: Into<String>>(mut self, options: S) -> Self {
        self.config.build_options = options.into();
        self
    }

    /// Class queried first.
    pub fn preferred_class(mut self, class: DeviceClass) -> Self {
        self.config.preferred_class = class;
        self
    }

    /// Class queried when the preferred one is empty.
    pub fn fallback_class(mut self, class: DeviceClass) -> Self {
        self.config.fallback_class = class;
        self
    }

    /// Use at most `max` devices.
    pub fn max_devices(mut self, max: usize) -> Self {
        self.config.max_devices = Some(max);
        self
    }

    /// Where leftover rows go.
    pub fn remainder_policy(mut self, policy: RemainderPolicy) -> Self {
        self.config.remainder_policy = policy;
        self
    }

    /// Turn metric collection on or off.
    #[cfg(feature = "telemetry")]
    pub fn enable_telemetry(mut self, enable: bool) -> Self {
        self.config.enable_telemetry = enable;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
