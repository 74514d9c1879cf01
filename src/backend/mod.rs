//! The platform seam.
//!
//! A [`ComputeBackend`] is the kernel compiler/runtime supplied by the
//! platform. The engine only ever calls into it; every handle type is owned
//! by the backend and releases its platform object when dropped.
//!
//! Two implementations ship with the crate:
//!
//! - [`host::HostBackend`]: an in-process software platform, always built.
//! - `opencl::OpenClBackend`: real devices through `opencl3`, behind the
//!   `opencl` feature.

/// In-process software platform.
pub mod host;

/// OpenCL devices through `opencl3`.
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::device::{DeviceClass, DeviceInfo};
use crate::status::Status;
use std::fmt;

pub use host::{HostBackend, HostBackendBuilder, WorkItem};

#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;

/// A failed program build together with the platform's build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// Status the build returned.
    pub status: Status,
    /// Build log across all devices, possibly empty.
    pub log: String,
}

impl BuildFailure {
    /// Pair a build status with its log.
    pub fn new(status: Status, log: impl Into<String>) -> Self {
        Self {
            status,
            log: log.into(),
        }
    }
}

/// Upper bound on the build log text fetched from a backend.
pub const MAX_BUILD_LOG_BYTES: usize = 64 * 1024;

/// Truncate a build log to [`MAX_BUILD_LOG_BYTES`] on a char boundary.
pub(crate) fn bound_build_log(mut log: String) -> String {
    if log.len() <= MAX_BUILD_LOG_BYTES {
        return log;
    }
    let mut cut = MAX_BUILD_LOG_BYTES;
    while !log.is_char_boundary(cut) {
        cut -= 1;
    }
    log.truncate(cut);
    log.push_str("\n... (build log truncated)");
    log
}

/// Operations a compute platform must provide.
///
/// All fallible calls report the raw platform [`Status`]; mapping to typed
/// errors happens in the engine.
pub trait ComputeBackend: Send + Sync {
    /// Device identifier.
    type Device: Clone + PartialEq + fmt::Debug + Send + Sync;
    /// Context over a set of devices.
    type Context: Send + Sync;
    /// Program built for a context.
    type Program: Send + Sync;
    /// Entry point of a built program.
    type Kernel: Send + Sync;
    /// In-order command queue on one device.
    type Queue: Send + Sync;
    /// Device memory allocated in a context.
    type Buffer: Send + Sync;

    /// Short platform name for diagnostics.
    fn name(&self) -> &str;

    /// Query up to `limit` devices of `class` (`None` means no cap), in
    /// platform order. An empty class may be reported either as an empty
    /// list or as `CL_DEVICE_NOT_FOUND`.
    fn device_ids(
        &self,
        class: DeviceClass,
        limit: Option<usize>,
    ) -> Result<Vec<Self::Device>, Status>;

    /// Class, vendor, name and compute units of `device`.
    fn device_info(&self, device: &Self::Device) -> Result<DeviceInfo, Status>;

    /// Bind `devices` into one context. The platform may drop or reorder
    /// some of them; see [`context_devices`](Self::context_devices).
    fn create_context(&self, devices: &[Self::Device]) -> Result<Self::Context, Status>;

    /// The authoritative device list of a created context.
    fn context_devices(&self, context: &Self::Context) -> Result<Vec<Self::Device>, Status>;

    /// Compile `source` for every device bound to `context`.
    fn build_program(
        &self,
        context: &Self::Context,
        source: &str,
        options: &str,
    ) -> Result<Self::Program, BuildFailure>;

    /// Resolve the kernel called `name`.
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, Status>;

    /// Create an in-order queue on `device`.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> Result<Self::Queue, Status>;

    /// Allocate a device-writable buffer of `len` bytes.
    fn create_buffer(&self, context: &Self::Context, len: usize) -> Result<Self::Buffer, Status>;

    /// Bind `buffer` as argument `index` of `kernel`.
    fn set_buffer_arg(
        &self,
        kernel: &Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<(), Status>;

    /// Enqueue a 2D ND-range of `extent` work items starting at `offset`.
    /// Non-blocking; arguments are captured at enqueue time.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        offset: [usize; 2],
        extent: [usize; 2],
    ) -> Result<(), Status>;

    /// Enqueue a non-blocking read of `dst.len()` bytes starting at
    /// `byte_offset` of `buffer` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must stay valid and must not be accessed by anyone else until
    /// [`finish`](Self::finish) has returned for `queue`.
    unsafe fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        byte_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), Status>;

    /// Block until every command submitted to `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<(), Status>;
}
