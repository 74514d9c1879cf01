//! In-process software platform.
//!
//! `HostBackend` behaves like a small compute platform: it exposes a
//! configurable inventory of simulated devices, binds them into contexts,
//! "builds" programs by checking kernel source text and linking each
//! declared kernel to a native Rust function, and runs every command queue
//! on its own worker thread. Commands on one queue run in submission order;
//! separate queues run concurrently, each kernel writing into a private
//! copy of the buffer that is merged back when the launch completes.
//!
//! Faults can be injected per device or per operation, and every platform
//! object is accounted for, so callers can check that nothing leaks on
//! failure paths.
//!
//! ```
//! use strata::backend::{ComputeBackend, HostBackend};
//! use strata::device::DeviceClass;
//!
//! let backend = HostBackend::builder()
//!     .gpus(2)
//!     .kernel("render", |item, out| {
//!         let idx = item.pixel_index(3);
//!         out[idx] = 255;
//!     })
//!     .build();
//!
//! let gpus = backend.device_ids(DeviceClass::Gpu, None).unwrap();
//! assert_eq!(gpus.len(), 2);
//! ```

mod program;
mod queue;

use self::queue::{Command, HostSlice, QueueWorker};
use super::{bound_build_log, BuildFailure, ComputeBackend};
use crate::device::{DeviceClass, DeviceInfo};
use crate::status::Status;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Native body of a kernel: called once per work item with the whole
/// output buffer.
pub type NativeKernel = Arc<dyn Fn(&WorkItem, &mut [u8]) + Send + Sync>;

/// Index space position of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Absolute position, offset included.
    pub global_id: [usize; 2],
    /// Extent of the ND-range this item belongs to.
    pub global_size: [usize; 2],
    /// Offset the ND-range was launched with.
    pub global_offset: [usize; 2],
}

impl WorkItem {
    /// Absolute column.
    pub fn x(&self) -> usize {
        self.global_id[0]
    }

    /// Absolute row.
    pub fn y(&self) -> usize {
        self.global_id[1]
    }

    /// Byte index of this item's pixel in a row-major buffer whose rows span
    /// the full ND-range width.
    pub fn pixel_index(&self, bytes_per_pixel: usize) -> usize {
        (self.y() * self.global_size[0] + self.x()) * bytes_per_pixel
    }
}

#[derive(Debug, Clone)]
struct DeviceSpec {
    class: DeviceClass,
    // position among devices of the same class
    ordinal: usize,
    name: String,
    compute_units: usize,
}

// faults address devices as (class, ordinal within class)
type DeviceKey = (DeviceClass, usize);

#[derive(Debug, Default, Clone)]
struct Faults {
    device_query: HashMap<DeviceClass, Status>,
    context: Option<Status>,
    build: Option<Status>,
    queue: HashMap<DeviceKey, Status>,
    dispatch: HashMap<DeviceKey, Status>,
    read: HashMap<DeviceKey, Status>,
    device_lost: HashMap<DeviceKey, Status>,
    context_shape: Option<ContextShape>,
}

// how a new context rewrites the device list it was given
#[derive(Debug, Clone, Copy)]
enum ContextShape {
    Keep(usize),
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Context,
    Program,
    Kernel,
    Queue,
    Buffer,
}

#[derive(Debug, Default)]
struct ResourceStats {
    device_queries: AtomicUsize,
    contexts_created: AtomicUsize,
    programs_built: AtomicUsize,
    kernels_created: AtomicUsize,
    queues_created: AtomicUsize,
    buffers_created: AtomicUsize,
    kernel_dispatches: AtomicUsize,
    reads: AtomicUsize,

    live_contexts: AtomicUsize,
    live_programs: AtomicUsize,
    live_kernels: AtomicUsize,
    live_queues: AtomicUsize,
    live_buffers: AtomicUsize,
}

impl ResourceStats {
    fn live(&self, resource: Resource) -> &AtomicUsize {
        match resource {
            Resource::Context => &self.live_contexts,
            Resource::Program => &self.live_programs,
            Resource::Kernel => &self.live_kernels,
            Resource::Queue => &self.live_queues,
            Resource::Buffer => &self.live_buffers,
        }
    }

    fn created(&self, resource: Resource) -> &AtomicUsize {
        match resource {
            Resource::Context => &self.contexts_created,
            Resource::Program => &self.programs_built,
            Resource::Kernel => &self.kernels_created,
            Resource::Queue => &self.queues_created,
            Resource::Buffer => &self.buffers_created,
        }
    }
}

/// Point-in-time copy of the platform's object accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    /// Device queries made, failed ones included.
    pub device_queries: usize,
    /// Contexts ever created.
    pub contexts_created: usize,
    /// Programs that built successfully.
    pub programs_built: usize,
    /// Kernel objects ever created.
    pub kernels_created: usize,
    /// Queues ever created.
    pub queues_created: usize,
    /// Buffers ever created.
    pub buffers_created: usize,
    /// Kernel launches accepted by a queue.
    pub kernel_dispatches: usize,
    /// Buffer reads accepted by a queue.
    pub reads: usize,
    /// Contexts not yet released.
    pub live_contexts: usize,
    /// Programs not yet released.
    pub live_programs: usize,
    /// Kernels not yet released.
    pub live_kernels: usize,
    /// Queues not yet released.
    pub live_queues: usize,
    /// Buffers not yet released.
    pub live_buffers: usize,
}

impl ResourceSnapshot {
    /// True when every created object has been released.
    pub fn all_released(&self) -> bool {
        self.live_contexts == 0
            && self.live_programs == 0
            && self.live_kernels == 0
            && self.live_queues == 0
            && self.live_buffers == 0
    }
}

// decrements the live counter of its resource on drop
struct Live {
    stats: Arc<ResourceStats>,
    resource: Resource,
}

impl Live {
    fn new(stats: &Arc<ResourceStats>, resource: Resource) -> Self {
        stats.created(resource).fetch_add(1, Ordering::Relaxed);
        stats.live(resource).fetch_add(1, Ordering::AcqRel);
        Self {
            stats: Arc::clone(stats),
            resource,
        }
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.stats.live(self.resource).fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Live {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Live({:?})", self.resource)
    }
}

struct Platform {
    devices: Vec<DeviceSpec>,
    kernels: HashMap<String, NativeKernel>,
    faults: Faults,
    stats: Arc<ResourceStats>,
}

/// Handle to one simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostDevice {
    id: usize,
    class: DeviceClass,
}

impl HostDevice {
    /// Position of the device in the platform inventory.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Class the device reports.
    pub fn class(&self) -> DeviceClass {
        self.class
    }
}

/// Context over a fixed list of host devices.
#[derive(Debug)]
pub struct HostContext {
    devices: Vec<HostDevice>,
    _live: Live,
}

/// Built program: the kernel names it declares.
#[derive(Debug)]
pub struct HostProgram {
    kernels: Vec<String>,
    _live: Live,
}

/// A declared kernel linked to its native body, with its bound buffer.
pub struct HostKernel {
    name: String,
    body: NativeKernel,
    arg: Mutex<Option<Arc<BufferStorage>>>,
    _live: Live,
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct BufferStorage {
    data: Mutex<Vec<u8>>,
}

/// Shared device memory.
pub struct HostBuffer {
    storage: Arc<BufferStorage>,
    len: usize,
    _live: Live,
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len).finish()
    }
}

/// In-order queue backed by one worker thread.
pub struct HostQueue {
    device: HostDevice,
    // declared before `_live` so the worker is joined first
    worker: QueueWorker,
    _live: Live,
}

impl fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostQueue")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// The software platform. Cheap to clone; clones share one inventory and
/// one set of counters.
#[derive(Clone)]
pub struct HostBackend {
    platform: Arc<Platform>,
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackend")
            .field("devices", &self.platform.devices)
            .field("kernels", &self.platform.kernels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HostBackend {
    /// Start from one CPU device and no kernels.
    pub fn builder() -> HostBackendBuilder {
        HostBackendBuilder::new()
    }

    /// Current object accounting.
    pub fn resources(&self) -> ResourceSnapshot {
        let s = &self.platform.stats;
        ResourceSnapshot {
            device_queries: s.device_queries.load(Ordering::Relaxed),
            contexts_created: s.contexts_created.load(Ordering::Relaxed),
            programs_built: s.programs_built.load(Ordering::Relaxed),
            kernels_created: s.kernels_created.load(Ordering::Relaxed),
            queues_created: s.queues_created.load(Ordering::Relaxed),
            buffers_created: s.buffers_created.load(Ordering::Relaxed),
            kernel_dispatches: s.kernel_dispatches.load(Ordering::Relaxed),
            reads: s.reads.load(Ordering::Relaxed),
            live_contexts: s.live_contexts.load(Ordering::Acquire),
            live_programs: s.live_programs.load(Ordering::Acquire),
            live_kernels: s.live_kernels.load(Ordering::Acquire),
            live_queues: s.live_queues.load(Ordering::Acquire),
            live_buffers: s.live_buffers.load(Ordering::Acquire),
        }
    }

    fn spec(&self, device: &HostDevice) -> Result<&DeviceSpec, Status> {
        self.platform
            .devices
            .get(device.id)
            .filter(|spec| spec.class == device.class)
            .ok_or(Status::INVALID_DEVICE)
    }

    fn key(&self, device: &HostDevice) -> Result<DeviceKey, Status> {
        self.spec(device).map(|spec| (spec.class, spec.ordinal))
    }

    fn stats(&self) -> &Arc<ResourceStats> {
        &self.platform.stats
    }

    // one log per device, as a real platform reports them
    fn build_failure(&self, context: &HostContext, mut errors: Vec<String>) -> BuildFailure {
        errors.push(format!("{} error(s) generated.", errors.len()));
        let body = errors.join("\n");
        let mut log = String::new();
        for device in &context.devices {
            let name = self
                .spec(device)
                .map(|spec| spec.name.as_str())
                .unwrap_or("unknown device");
            log.push_str(&format!("=== {} ===\n{}\n", name, body));
        }
        BuildFailure::new(Status::BUILD_PROGRAM_FAILURE, bound_build_log(log))
    }
}

impl ComputeBackend for HostBackend {
    type Device = HostDevice;
    type Context = HostContext;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Queue = HostQueue;
    type Buffer = HostBuffer;

    fn name(&self) -> &str {
        "host"
    }

    fn device_ids(
        &self,
        class: DeviceClass,
        limit: Option<usize>,
    ) -> Result<Vec<HostDevice>, Status> {
        self.stats().device_queries.fetch_add(1, Ordering::Relaxed);

        if let Some(&status) = self.platform.faults.device_query.get(&class) {
            return Err(status);
        }
        if limit == Some(0) {
            return Err(Status::INVALID_VALUE);
        }

        let devices: Vec<_> = self
            .platform
            .devices
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.class.matches(class))
            .map(|(id, spec)| HostDevice {
                id,
                class: spec.class,
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        if devices.is_empty() {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(devices)
    }

    fn device_info(&self, device: &HostDevice) -> Result<DeviceInfo, Status> {
        let spec = self.spec(device)?;
        Ok(DeviceInfo {
            class: spec.class,
            vendor: "Strata".to_string(),
            name: spec.name.clone(),
            compute_units: spec.compute_units,
        })
    }

    fn create_context(&self, devices: &[HostDevice]) -> Result<HostContext, Status> {
        if devices.is_empty() {
            return Err(Status::INVALID_VALUE);
        }
        for device in devices {
            self.spec(device)?;
        }
        if let Some(status) = self.platform.faults.context {
            return Err(status);
        }

        let mut bound = devices.to_vec();
        match self.platform.faults.context_shape {
            Some(ContextShape::Keep(n)) => bound.truncate(n),
            Some(ContextShape::Reverse) => bound.reverse(),
            None => {}
        }
        if bound.as_slice() != devices {
            debug!(requested = devices.len(), bound = bound.len(), "context device list rewritten");
        }

        Ok(HostContext {
            devices: bound,
            _live: Live::new(self.stats(), Resource::Context),
        })
    }

    fn context_devices(&self, context: &HostContext) -> Result<Vec<HostDevice>, Status> {
        Ok(context.devices.clone())
    }

    fn build_program(
        &self,
        context: &HostContext,
        source: &str,
        options: &str,
    ) -> Result<HostProgram, BuildFailure> {
        if let Some(bad) = options.split_whitespace().find(|opt| !opt.starts_with('-')) {
            return Err(BuildFailure::new(
                Status::INVALID_BUILD_OPTIONS,
                format!("unsupported build option `{}`", bad),
            ));
        }

        if let Some(status) = self.platform.faults.build {
            return Err(BuildFailure::new(
                status,
                bound_build_log(format!("compiler fault {}", status)),
            ));
        }

        let declared = program::scan(source).map_err(|diagnostics| {
            self.build_failure(context, diagnostics.iter().map(ToString::to_string).collect())
        })?;

        let unlinked: Vec<String> = declared
            .iter()
            .filter(|k| !self.platform.kernels.contains_key(&k.name))
            .map(|k| {
                format!(
                    "<program source>:{}: error: kernel '{}' has no native implementation",
                    k.line, k.name
                )
            })
            .collect();
        if !unlinked.is_empty() {
            return Err(self.build_failure(context, unlinked));
        }

        let kernels: Vec<String> = declared.into_iter().map(|k| k.name).collect();
        debug!(?kernels, "host program built");
        Ok(HostProgram {
            kernels,
            _live: Live::new(self.stats(), Resource::Program),
        })
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel, Status> {
        if !program.kernels.iter().any(|k| k == name) {
            return Err(Status::INVALID_KERNEL_NAME);
        }
        let body = self
            .platform
            .kernels
            .get(name)
            .cloned()
            .ok_or(Status::INVALID_KERNEL_NAME)?;

        Ok(HostKernel {
            name: name.to_string(),
            body,
            arg: Mutex::new(None),
            _live: Live::new(self.stats(), Resource::Kernel),
        })
    }

    fn create_queue(&self, context: &HostContext, device: &HostDevice) -> Result<HostQueue, Status> {
        if !context.devices.contains(device) {
            return Err(Status::INVALID_DEVICE);
        }
        let spec = self.spec(device)?;
        let key = (spec.class, spec.ordinal);
        if let Some(&status) = self.platform.faults.queue.get(&key) {
            return Err(status);
        }

        let fault = self.platform.faults.device_lost.get(&key).copied();
        let thread_name = format!("strata-queue-{}", device.id);
        let worker = QueueWorker::spawn(thread_name, fault).map_err(|_| Status::OUT_OF_HOST_MEMORY)?;
        debug!(device = device.id, name = %spec.name, "host queue created");

        Ok(HostQueue {
            device: device.clone(),
            worker,
            _live: Live::new(self.stats(), Resource::Queue),
        })
    }

    fn create_buffer(&self, _context: &HostContext, len: usize) -> Result<HostBuffer, Status> {
        if len == 0 {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        Ok(HostBuffer {
            storage: Arc::new(BufferStorage {
                data: Mutex::new(vec![0u8; len]),
            }),
            len,
            _live: Live::new(self.stats(), Resource::Buffer),
        })
    }

    fn set_buffer_arg(&self, kernel: &HostKernel, index: u32, buffer: &HostBuffer) -> Result<(), Status> {
        if index != 0 {
            return Err(Status::INVALID_ARG_INDEX);
        }
        *kernel.arg.lock() = Some(Arc::clone(&buffer.storage));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        offset: [usize; 2],
        extent: [usize; 2],
    ) -> Result<(), Status> {
        if let Some(&status) = self.platform.faults.dispatch.get(&self.key(&queue.device)?) {
            return Err(status);
        }
        if extent[0] == 0 || extent[1] == 0 {
            return Err(Status::INVALID_GLOBAL_WORK_SIZE);
        }
        let buffer = kernel.arg.lock().clone().ok_or(Status::INVALID_KERNEL_ARGS)?;

        queue.worker.submit(Command::Execute {
            kernel: Arc::clone(&kernel.body),
            buffer,
            offset,
            extent,
        })?;
        self.stats().kernel_dispatches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn enqueue_read(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        byte_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), Status> {
        if let Some(&status) = self.platform.faults.read.get(&self.key(&queue.device)?) {
            return Err(status);
        }
        let end = byte_offset.checked_add(dst.len()).ok_or(Status::INVALID_VALUE)?;
        if end > buffer.len {
            return Err(Status::INVALID_VALUE);
        }

        queue.worker.submit(Command::Read {
            buffer: Arc::clone(&buffer.storage),
            byte_offset,
            dst: HostSlice::new(dst),
        })?;
        self.stats().reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn finish(&self, queue: &HostQueue) -> Result<(), Status> {
        queue.worker.finish()
    }
}

/// Builder for [`HostBackend`].
pub struct HostBackendBuilder {
    devices: Vec<DeviceSpec>,
    kernels: HashMap<String, NativeKernel>,
    faults: Faults,
}

impl fmt::Debug for HostBackendBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackendBuilder")
            .field("devices", &self.devices)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl Default for HostBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackendBuilder {
    /// One CPU device sized to the machine, no GPUs, no kernels.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            kernels: HashMap::new(),
            faults: Faults::default(),
        }
        .cpus(1)
    }

    fn replace_class(mut self, class: DeviceClass, count: usize, compute_units: usize) -> Self {
        self.devices.retain(|spec| spec.class != class);
        let label = match class {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
            DeviceClass::Accelerator => "Accelerator",
            DeviceClass::All => "Device",
        };
        for i in 0..count {
            self.devices.push(DeviceSpec {
                class,
                ordinal: i,
                name: format!("Host {} {}", label, i),
                compute_units,
            });
        }
        self
    }

    /// Replace the simulated GPU inventory with `count` devices.
    pub fn gpus(self, count: usize) -> Self {
        self.replace_class(DeviceClass::Gpu, count, 32)
    }

    /// Replace the simulated CPU inventory with `count` devices.
    pub fn cpus(self, count: usize) -> Self {
        self.replace_class(DeviceClass::Cpu, count, num_cpus::get())
    }

    /// Append one named device.
    pub fn device(mut self, class: DeviceClass, name: impl Into<String>, compute_units: usize) -> Self {
        let ordinal = self.devices.iter().filter(|spec| spec.class == class).count();
        self.devices.push(DeviceSpec {
            class,
            ordinal,
            name: name.into(),
            compute_units,
        });
        self
    }

    /// Link a native implementation for kernels declared as `name`.
    pub fn kernel<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&WorkItem, &mut [u8]) + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(body));
        self
    }

    /// Make device queries for `class` fail with `status`.
    pub fn fail_device_query(mut self, class: DeviceClass, status: Status) -> Self {
        self.faults.device_query.insert(class, status);
        self
    }

    /// Make context creation fail with `status`.
    pub fn reject_context(mut self, status: Status) -> Self {
        self.faults.context = Some(status);
        self
    }

    /// Make every program build fail with `status`.
    pub fn fail_build(mut self, status: Status) -> Self {
        self.faults.build = Some(status);
        self
    }

    /// Bind only the first `n` requested devices into new contexts, the
    /// way a platform may silently drop devices it cannot share.
    pub fn context_keeps(mut self, n: usize) -> Self {
        self.faults.context_shape = Some(ContextShape::Keep(n));
        self
    }

    /// Report context devices in the reverse of the requested order.
    pub fn reverse_context_devices(mut self) -> Self {
        self.faults.context_shape = Some(ContextShape::Reverse);
        self
    }

    // Per-device faults address the `ordinal`-th device of `class`, in the
    // order the inventory lists them.

    /// Make queue creation fail for one device.
    pub fn fail_queue(mut self, class: DeviceClass, ordinal: usize, status: Status) -> Self {
        self.faults.queue.insert((class, ordinal), status);
        self
    }

    /// Make kernel submission to one device fail at enqueue time.
    pub fn fail_dispatch(mut self, class: DeviceClass, ordinal: usize, status: Status) -> Self {
        self.faults.dispatch.insert((class, ordinal), status);
        self
    }

    /// Make read submission on one device fail at enqueue time.
    pub fn fail_read(mut self, class: DeviceClass, ordinal: usize, status: Status) -> Self {
        self.faults.read.insert((class, ordinal), status);
        self
    }

    /// Accept work on one device but fail it during execution; the fault
    /// surfaces when the queue is joined.
    pub fn lose_device(mut self, class: DeviceClass, ordinal: usize, status: Status) -> Self {
        self.faults.device_lost.insert((class, ordinal), status);
        self
    }

    /// Freeze the inventory, kernels and faults into a platform.
    pub fn build(self) -> HostBackend {
        HostBackend {
            platform: Arc::new(Platform {
                devices: self.devices,
                kernels: self.kernels,
                faults: self.faults,
                stats: Arc::new(ResourceStats::default()),
            }),
        }
    }
}
