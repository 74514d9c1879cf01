//! Error types and their mapping from platform status codes.

use crate::device::DeviceClass;
use crate::status::{Status, StatusCategory};
use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The platform operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Listing devices of a class.
    EnumerateDevices,
    /// Listing the devices bound to a context.
    QueryDevices,
    /// Creating the shared context.
    CreateContext,
    /// Reading the kernel source file.
    ReadSource,
    /// Compiling the program.
    BuildProgram,
    /// Looking up the kernel entry point.
    CreateKernel,
    /// Creating a device queue.
    CreateQueue,
    /// Allocating the output buffer.
    CreateBuffer,
    /// Binding the output buffer argument.
    SetKernelArg,
    /// Launching a band.
    EnqueueKernel,
    /// Reading a band back.
    EnqueueRead,
    /// Joining a queue.
    Finish,
    /// Validating configuration.
    Configure,
    /// Handing the image to an encoder.
    Encode,
    /// Exporting metrics.
    Telemetry,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::EnumerateDevices => "device enumeration",
            Operation::QueryDevices => "device query",
            Operation::CreateContext => "context creation",
            Operation::ReadSource => "kernel source read",
            Operation::BuildProgram => "program build",
            Operation::CreateKernel => "kernel creation",
            Operation::CreateQueue => "queue creation",
            Operation::CreateBuffer => "buffer creation",
            Operation::SetKernelArg => "kernel argument binding",
            Operation::EnqueueKernel => "kernel dispatch",
            Operation::EnqueueRead => "buffer read-back",
            Operation::Finish => "queue join",
            Operation::Configure => "configuration",
            Operation::Encode => "image encoding",
            Operation::Telemetry => "telemetry export",
        };
        f.write_str(name)
    }
}

/// Everything that can stop a render.
///
/// Variants carrying a `device` name the queue index of the device in the
/// context's device list.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither device class produced a device.
    #[error("no compute device found (tried {preferred}, then {fallback})")]
    NoDeviceFound {
        /// Class queried first.
        preferred: DeviceClass,
        /// Class queried after the preferred one came back empty.
        fallback: DeviceClass,
    },

    /// Devices of a context could not be listed or described.
    #[error("device query failed: {status}")]
    DeviceQueryFailed {
        /// Platform status.
        status: Status,
    },

    /// The platform refused to bind the devices into a context.
    #[error("context creation failed: {status}")]
    ContextCreationFailed {
        /// Platform status.
        status: Status,
    },

    /// A queue could not be created; queues already created are released.
    #[error("queue creation failed for device {device}: {status}")]
    QueueCreationFailed {
        /// Device index.
        device: usize,
        /// Platform status.
        status: Status,
    },

    /// The kernel source file could not be read as text. A missing file
    /// and a file that is not valid UTF-8 both land here; the message
    /// names which.
    #[error("kernel source at {} {}: {source}", .path.display(), read_failure(.source))]
    SourceNotFound {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Compilation failed.
    #[error("program build failed: {status}\n{log}")]
    BuildFailed {
        /// Platform status.
        status: Status,
        /// Build log, never empty.
        log: String,
    },

    /// The program built but has no kernel with the requested name.
    #[error("kernel entry point `{name}` not found: {status}")]
    KernelNotFound {
        /// Requested entry point.
        name: String,
        /// Platform status.
        status: Status,
    },

    /// The output buffer could not be allocated.
    #[error("output buffer creation failed ({len} bytes): {status}")]
    BufferCreationFailed {
        /// Requested size in bytes.
        len: usize,
        /// Platform status.
        status: Status,
    },

    /// The output buffer could not be bound as the kernel argument.
    #[error("kernel argument binding failed for device {device}: {status}")]
    ArgumentBindingFailed {
        /// Device index.
        device: usize,
        /// Platform status.
        status: Status,
    },

    /// A band's kernel launch was refused.
    #[error("kernel dispatch failed on device {device}: {status}")]
    DispatchFailed {
        /// Device index.
        device: usize,
        /// Platform status.
        status: Status,
    },

    /// A band's read-back was refused.
    #[error("read-back failed on device {device}: {status}")]
    ReadbackFailed {
        /// Device index.
        device: usize,
        /// Platform status.
        status: Status,
    },

    /// Work accepted by a queue failed while it drained.
    #[error("queue join failed on device {device}: {status}")]
    SyncFailed {
        /// Device index.
        device: usize,
        /// Platform status.
        status: Status,
    },

    /// A status outside the known table. Always fatal. Carries no build
    /// log; a failed build with such a status logs it through `tracing`.
    #[error("{operation} returned unmapped status {code}: unknown error")]
    UnknownStatus {
        /// Operation that returned the code.
        operation: Operation,
        /// The raw code.
        code: i32,
    },

    /// Invalid configuration or image layout.
    #[error("config error: {0}")]
    Config(String),

    /// Metrics could not be exported.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// I/O outside kernel source loading, e.g. in an encoder.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn read_failure(err: &std::io::Error) -> &'static str {
    match err.kind() {
        std::io::ErrorKind::NotFound => "was not found",
        std::io::ErrorKind::InvalidData => "is not valid UTF-8 text",
        std::io::ErrorKind::PermissionDenied => "is not readable",
        _ => "could not be read",
    }
}

impl Error {
    /// A configuration error with the given message.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// A telemetry error with the given message.
    pub fn telemetry<S: Into<String>>(msg: S) -> Self {
        Error::Telemetry(msg.into())
    }

    /// Map a failing platform status to a typed error. Codes outside the
    /// known table become `UnknownStatus` regardless of the operation.
    pub(crate) fn from_status(
        operation: Operation,
        status: Status,
        kind: impl FnOnce(Status) -> Error,
    ) -> Self {
        if status.is_mapped() {
            kind(status)
        } else {
            Error::UnknownStatus {
                operation,
                code: status.code(),
            }
        }
    }

    /// The platform status behind this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::DeviceQueryFailed { status }
            | Error::ContextCreationFailed { status }
            | Error::QueueCreationFailed { status, .. }
            | Error::BuildFailed { status, .. }
            | Error::KernelNotFound { status, .. }
            | Error::BufferCreationFailed { status, .. }
            | Error::ArgumentBindingFailed { status, .. }
            | Error::DispatchFailed { status, .. }
            | Error::ReadbackFailed { status, .. }
            | Error::SyncFailed { status, .. } => Some(*status),
            Error::UnknownStatus { code, .. } => Some(Status::from_code(*code)),
            _ => None,
        }
    }

    /// Diagnostic category of the underlying status.
    pub fn category(&self) -> Option<StatusCategory> {
        self.status().map(Status::category)
    }

    /// The operation that failed.
    pub fn operation(&self) -> Operation {
        match self {
            Error::NoDeviceFound { .. } => Operation::EnumerateDevices,
            Error::DeviceQueryFailed { .. } => Operation::QueryDevices,
            Error::ContextCreationFailed { .. } => Operation::CreateContext,
            Error::QueueCreationFailed { .. } => Operation::CreateQueue,
            Error::SourceNotFound { .. } => Operation::ReadSource,
            Error::BuildFailed { .. } => Operation::BuildProgram,
            Error::KernelNotFound { .. } => Operation::CreateKernel,
            Error::BufferCreationFailed { .. } => Operation::CreateBuffer,
            Error::ArgumentBindingFailed { .. } => Operation::SetKernelArg,
            Error::DispatchFailed { .. } => Operation::EnqueueKernel,
            Error::ReadbackFailed { .. } => Operation::EnqueueRead,
            Error::SyncFailed { .. } => Operation::Finish,
            Error::UnknownStatus { operation, .. } => *operation,
            Error::Config(_) => Operation::Configure,
            Error::Telemetry(_) => Operation::Telemetry,
            Error::Io(_) => Operation::Encode,
        }
    }

    /// One-line diagnostic naming the failing operation and its category.
    pub fn diagnostic(&self) -> String {
        match self.category() {
            Some(category) => format!("{} failed ({}): {}", self.operation(), category, self),
            None => format!("{} failed: {}", self.operation(), self),
        }
    }
}
