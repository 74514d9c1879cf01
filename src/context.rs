//! Compute context lifecycle.

use crate::backend::ComputeBackend;
use crate::device::DeviceInfo;
use crate::error::{Error, Operation, Result};
use std::fmt;
use tracing::{debug, info};

/// One compute context over the enumerated device set.
///
/// Everything allocated from a context borrows it, so buffers, programs
/// and queues are always released before the context itself.
pub struct ComputeContext<'b, B: ComputeBackend> {
    backend: &'b B,
    raw: B::Context,
}

impl<'b, B: ComputeBackend> ComputeContext<'b, B> {
    /// Bind every device in `devices` into a single context.
    pub fn create(backend: &'b B, devices: &[B::Device]) -> Result<Self> {
        let raw = backend.create_context(devices).map_err(|status| {
            Error::from_status(Operation::CreateContext, status, |status| {
                Error::ContextCreationFailed { status }
            })
        })?;
        debug!(backend = backend.name(), requested = devices.len(), "context created");
        Ok(Self { backend, raw })
    }

    /// Platform the context lives on.
    pub fn backend(&self) -> &'b B {
        self.backend
    }

    pub(crate) fn raw(&self) -> &B::Context {
        &self.raw
    }

    /// The authoritative device list; the platform may reduce or reorder
    /// the set it was given.
    pub fn query_devices(&self) -> Result<Vec<B::Device>> {
        let devices = self.backend.context_devices(&self.raw).map_err(|status| {
            Error::from_status(Operation::QueryDevices, status, |status| {
                Error::DeviceQueryFailed { status }
            })
        })?;
        if devices.is_empty() {
            return Err(Error::DeviceQueryFailed {
                status: crate::status::Status::DEVICE_NOT_FOUND,
            });
        }
        Ok(devices)
    }

    /// Identification of every context device, logged as
    /// `Device i: vendor name`.
    pub fn describe_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.query_devices()?;
        let mut infos = Vec::with_capacity(devices.len());
        for (i, device) in devices.iter().enumerate() {
            let device_info = self.backend.device_info(device).map_err(|status| {
                Error::from_status(Operation::QueryDevices, status, |status| {
                    Error::DeviceQueryFailed { status }
                })
            })?;
            info!(
                class = %device_info.class,
                compute_units = device_info.compute_units,
                "Device {}: {}",
                i,
                device_info
            );
            infos.push(device_info);
        }
        Ok(infos)
    }

    /// Allocate the shared device-writable output buffer.
    pub fn create_buffer(&self, len: usize) -> Result<OutputBuffer<'_, B>> {
        let raw = self.backend.create_buffer(&self.raw, len).map_err(|status| {
            Error::from_status(Operation::CreateBuffer, status, |status| {
                Error::BufferCreationFailed { len, status }
            })
        })?;
        debug!(len, "output buffer created");
        Ok(OutputBuffer {
            raw,
            len,
            _context: self,
        })
    }
}

impl<B: ComputeBackend> fmt::Debug for ComputeContext<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

/// Device memory the kernel writes every band into.
pub struct OutputBuffer<'c, B: ComputeBackend> {
    raw: B::Buffer,
    len: usize,
    _context: &'c ComputeContext<'c, B>,
}

impl<B: ComputeBackend> OutputBuffer<'_, B> {
    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-byte buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn raw(&self) -> &B::Buffer {
        &self.raw
    }
}

impl<B: ComputeBackend> fmt::Debug for OutputBuffer<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer").field("len", &self.len).finish()
    }
}
