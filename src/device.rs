//! Device discovery with a fallback class.

use crate::backend::ComputeBackend;
use crate::error::{Error, Result};
use crate::status::Status;
use std::fmt;
use tracing::{debug, info, warn};

/// Class of compute device to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Discrete or integrated graphics processors.
    Gpu,
    /// Host processors exposed as compute devices.
    Cpu,
    /// Dedicated accelerators.
    Accelerator,
    /// Any class.
    All,
}

impl DeviceClass {
    /// Whether a device of class `self` satisfies a query for `query`.
    pub fn matches(self, query: DeviceClass) -> bool {
        query == DeviceClass::All || self == query
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Gpu => write!(f, "GPU"),
            DeviceClass::Cpu => write!(f, "CPU"),
            DeviceClass::Accelerator => write!(f, "accelerator"),
            DeviceClass::All => write!(f, "any"),
        }
    }
}

/// Identification strings and capacity of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Class the device reports.
    pub class: DeviceClass,
    /// Vendor string.
    pub vendor: String,
    /// Device name.
    pub name: String,
    /// Parallel compute units.
    pub compute_units: usize,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.vendor.trim(), self.name.trim())
    }
}

/// Result of enumeration: the devices of exactly one class.
#[derive(Debug, Clone)]
pub struct DeviceSet<D> {
    /// Class the devices were found under.
    pub class: DeviceClass,
    /// Devices in platform order.
    pub devices: Vec<D>,
    /// True when the preferred class came back empty.
    pub fell_back: bool,
}

impl<D> DeviceSet<D> {
    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no device was found.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn query<B: ComputeBackend>(
    backend: &B,
    class: DeviceClass,
    max_devices: Option<usize>,
) -> Vec<B::Device> {
    match backend.device_ids(class, max_devices) {
        Ok(mut devices) => {
            if let Some(max) = max_devices {
                devices.truncate(max);
            }
            devices
        }
        Err(status) if status == Status::DEVICE_NOT_FOUND => Vec::new(),
        Err(status) => {
            warn!(%class, %status, "device query failed, treating class as empty");
            Vec::new()
        }
    }
}

/// Discover devices, preferring `preferred` and degrading to `fallback`.
///
/// The fallback class is queried first, then the preferred class. A
/// non-empty preferred result is used exclusively; the two sets are never
/// merged. Both empty is fatal.
pub fn enumerate<B: ComputeBackend>(
    backend: &B,
    preferred: DeviceClass,
    fallback: DeviceClass,
    max_devices: Option<usize>,
) -> Result<DeviceSet<B::Device>> {
    let fallback_devices = query(backend, fallback, max_devices);
    debug!(class = %fallback, count = fallback_devices.len(), "fallback query");

    let preferred_devices = query(backend, preferred, max_devices);
    debug!(class = %preferred, count = preferred_devices.len(), "preferred query");

    if !preferred_devices.is_empty() {
        info!(
            backend = backend.name(),
            class = %preferred,
            count = preferred_devices.len(),
            "using preferred devices"
        );
        return Ok(DeviceSet {
            class: preferred,
            devices: preferred_devices,
            fell_back: false,
        });
    }

    if fallback_devices.is_empty() {
        return Err(Error::NoDeviceFound {
            preferred,
            fallback,
        });
    }

    warn!(
        backend = backend.name(),
        preferred = %preferred,
        fallback = %fallback,
        count = fallback_devices.len(),
        "no preferred devices, falling back"
    );
    Ok(DeviceSet {
        class: fallback,
        devices: fallback_devices,
        fell_back: true,
    })
}
