//! Common imports.

pub use crate::backend::{ComputeBackend, HostBackend, HostBackendBuilder, WorkItem};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::device::{DeviceClass, DeviceInfo};
pub use crate::dispatch::DispatchReport;
pub use crate::engine::{Engine, HostImage, ImageEncoder, Render};
pub use crate::error::{Error, Result};
pub use crate::partition::RemainderPolicy;
pub use crate::status::{Status, StatusCategory};
pub use crate::telemetry::{DispatchMetrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{ConsoleExporter, JsonExporter, MetricsExporter};

#[cfg(feature = "opencl")]
pub use crate::backend::OpenClBackend;
