//! OpenCL platform through `opencl3`.
//!
//! Devices come from the first installed platform. Raw OpenCL error codes
//! are passed through unchanged as [`Status`] values.

use super::{bound_build_log, BuildFailure, ComputeBackend};
use crate::device::{DeviceClass, DeviceInfo};
use crate::status::Status;
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_WRITE_ONLY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type, CL_NON_BLOCKING};
use std::fmt;
use std::ptr;
use tracing::{debug, warn};

fn status(err: ClError) -> Status {
    Status::from_code(err.0)
}

fn device_type(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceClass::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_class(bits: cl_device_type) -> DeviceClass {
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if bits & CL_DEVICE_TYPE_CPU != 0 {
        DeviceClass::Cpu
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceClass::Accelerator
    } else {
        DeviceClass::All
    }
}

/// A device id of the selected platform.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ClDevice(cl_device_id);

// SAFETY: device ids are immutable platform-owned handles; the OpenCL API
// is thread-safe for everything except `clSetKernelArg` on one kernel,
// which the engine only calls from its control thread.
unsafe impl Send for ClDevice {}
unsafe impl Sync for ClDevice {}

impl fmt::Debug for ClDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClDevice({:p})", self.0)
    }
}

macro_rules! cl_handle {
    ($name:ident, $inner:ty) => {
        #[doc = concat!("OpenCL `", stringify!($inner), "` handle.")]
        pub struct $name($inner);

        // SAFETY: see `ClDevice`
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }
    };
}

cl_handle!(ClContext, Context);
cl_handle!(ClProgram, Program);
cl_handle!(ClKernel, Kernel);
cl_handle!(ClQueue, CommandQueue);
cl_handle!(ClBuffer, Buffer<u8>);

/// Real compute devices of the first OpenCL platform.
pub struct OpenClBackend {
    platform: Platform,
    platform_name: String,
}

// SAFETY: a platform id is an immutable handle
unsafe impl Send for OpenClBackend {}
unsafe impl Sync for OpenClBackend {}

impl fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClBackend")
            .field("platform", &self.platform_name)
            .finish()
    }
}

impl OpenClBackend {
    /// Bind to the first installed platform.
    pub fn new() -> Result<Self, Status> {
        let platforms = get_platforms().map_err(status)?;
        let platform = *platforms
            .first()
            .ok_or(Status::from_code(-1001))?;
        let platform_name = platform.name().unwrap_or_default();
        debug!(platform = %platform_name, "OpenCL platform selected");
        Ok(Self {
            platform,
            platform_name,
        })
    }

    /// Name the platform reports.
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }
}

impl ComputeBackend for OpenClBackend {
    type Device = ClDevice;
    type Context = ClContext;
    type Program = ClProgram;
    type Kernel = ClKernel;
    type Queue = ClQueue;
    type Buffer = ClBuffer;

    fn name(&self) -> &str {
        "opencl"
    }

    fn device_ids(
        &self,
        class: DeviceClass,
        limit: Option<usize>,
    ) -> Result<Vec<ClDevice>, Status> {
        let ids = self
            .platform
            .get_devices(device_type(class))
            .map_err(status)?;
        Ok(ids
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(ClDevice)
            .collect())
    }

    fn device_info(&self, device: &ClDevice) -> Result<DeviceInfo, Status> {
        let d = Device::new(device.0);
        Ok(DeviceInfo {
            class: device_class(d.dev_type().map_err(status)?),
            vendor: d.vendor().map_err(status)?,
            name: d.name().map_err(status)?,
            compute_units: d.max_compute_units().map_err(status)? as usize,
        })
    }

    fn create_context(&self, devices: &[ClDevice]) -> Result<ClContext, Status> {
        let ids: Vec<cl_device_id> = devices.iter().map(|d| d.0).collect();
        Context::from_devices(&ids, &[], None, ptr::null_mut())
            .map(ClContext)
            .map_err(status)
    }

    fn context_devices(&self, context: &ClContext) -> Result<Vec<ClDevice>, Status> {
        Ok(context.0.devices().iter().copied().map(ClDevice).collect())
    }

    fn build_program(
        &self,
        context: &ClContext,
        source: &str,
        options: &str,
    ) -> Result<ClProgram, BuildFailure> {
        let mut program = Program::create_from_source(&context.0, source)
            .map_err(|err| BuildFailure::new(status(err), "program object could not be created"))?;

        if let Err(err) = program.build(context.0.devices(), options) {
            let mut log = String::new();
            for &id in context.0.devices() {
                let name = Device::new(id).name().unwrap_or_default();
                match program.get_build_log(id) {
                    Ok(text) => log.push_str(&format!("=== {} ===\n{}\n", name.trim(), text)),
                    Err(e) => {
                        warn!(device = %name, code = e.0, "build log unavailable");
                    }
                }
            }
            return Err(BuildFailure::new(status(err), bound_build_log(log)));
        }

        Ok(ClProgram(program))
    }

    fn create_kernel(&self, program: &ClProgram, name: &str) -> Result<ClKernel, Status> {
        Kernel::create(&program.0, name).map(ClKernel).map_err(status)
    }

    fn create_queue(&self, context: &ClContext, device: &ClDevice) -> Result<ClQueue, Status> {
        #[allow(deprecated)]
        let queue = CommandQueue::create_command_queue(&context.0, device.0, 0).map_err(status)?;
        Ok(ClQueue(queue))
    }

    fn create_buffer(&self, context: &ClContext, len: usize) -> Result<ClBuffer, Status> {
        // SAFETY: no host pointer is supplied
        let buffer = unsafe {
            Buffer::<u8>::create(&context.0, CL_MEM_WRITE_ONLY, len, ptr::null_mut())
        }
        .map_err(status)?;
        Ok(ClBuffer(buffer))
    }

    fn set_buffer_arg(&self, kernel: &ClKernel, index: u32, buffer: &ClBuffer) -> Result<(), Status> {
        let mem = buffer.0.get();
        // SAFETY: the argument is a live cl_mem handle of the right size
        unsafe { kernel.0.set_arg(index, &mem) }.map_err(status)
    }

    fn enqueue_kernel(
        &self,
        queue: &ClQueue,
        kernel: &ClKernel,
        offset: [usize; 2],
        extent: [usize; 2],
    ) -> Result<(), Status> {
        // SAFETY: offset and extent outlive the call; the platform copies them
        let event = unsafe {
            queue.0.enqueue_nd_range_kernel(
                kernel.0.get(),
                2,
                offset.as_ptr(),
                extent.as_ptr(),
                ptr::null(),
                &[],
            )
        }
        .map_err(status)?;
        drop(event);
        Ok(())
    }

    unsafe fn enqueue_read(
        &self,
        queue: &ClQueue,
        buffer: &ClBuffer,
        byte_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), Status> {
        queue
            .0
            .enqueue_read_buffer(&buffer.0, CL_NON_BLOCKING, byte_offset, dst, &[])
            .map(drop)
            .map_err(status)
    }

    fn finish(&self, queue: &ClQueue) -> Result<(), Status> {
        queue.0.finish().map_err(status)
    }
}
