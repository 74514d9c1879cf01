//! One command queue per participating device.

use crate::backend::ComputeBackend;
use crate::context::ComputeContext;
use crate::error::{Error, Operation, Result};
use std::fmt;
use tracing::debug;

/// A command queue bound to the device at `index` in the context's list.
pub struct DeviceQueue<B: ComputeBackend> {
    index: usize,
    device: B::Device,
    raw: B::Queue,
}

impl<B: ComputeBackend> DeviceQueue<B> {
    /// Position of the device in the context's list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The device this queue submits to.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub(crate) fn raw(&self) -> &B::Queue {
        &self.raw
    }
}

/// Queues in device order. Creation is all-or-nothing.
pub struct QueuePool<'c, B: ComputeBackend> {
    context: &'c ComputeContext<'c, B>,
    queues: Vec<DeviceQueue<B>>,
}

impl<'c, B: ComputeBackend> QueuePool<'c, B> {
    /// Create one queue per device, preserving order. If any device
    /// refuses a queue, the queues already created are released and the
    /// whole pool fails.
    pub fn create(context: &'c ComputeContext<'c, B>, devices: &[B::Device]) -> Result<Self> {
        let backend = context.backend();
        let mut queues = Vec::with_capacity(devices.len());

        for (index, device) in devices.iter().enumerate() {
            let raw = backend.create_queue(context.raw(), device).map_err(|status| {
                Error::from_status(Operation::CreateQueue, status, |status| {
                    Error::QueueCreationFailed {
                        device: index,
                        status,
                    }
                })
            })?;
            debug!(device = index, "queue created");
            queues.push(DeviceQueue {
                index,
                device: device.clone(),
                raw,
            });
        }

        Ok(Self { context, queues })
    }

    pub(crate) fn backend(&self) -> &'c B {
        self.context.backend()
    }

    /// Number of queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether the pool holds no queues.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queue for the device at `index`.
    pub fn get(&self, index: usize) -> Option<&DeviceQueue<B>> {
        self.queues.get(index)
    }

    /// Queues in device order.
    pub fn iter(&self) -> std::slice::Iter<'_, DeviceQueue<B>> {
        self.queues.iter()
    }

    /// Block until `queue` has drained.
    pub fn finish(&self, queue: &DeviceQueue<B>) -> Result<()> {
        self.backend().finish(queue.raw()).map_err(|status| {
            Error::from_status(Operation::Finish, status, |status| Error::SyncFailed {
                device: queue.index,
                status,
            })
        })
    }

    /// Join every queue. All queues are joined even when one fails; the
    /// first failure is returned.
    pub fn finish_all(&self) -> Result<()> {
        let mut first = None;
        for queue in &self.queues {
            if let Err(err) = self.finish(queue) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<B: ComputeBackend> fmt::Debug for DeviceQueue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceQueue")
            .field("index", &self.index)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl<B: ComputeBackend> fmt::Debug for QueuePool<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuePool")
            .field("queues", &self.queues.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::device::DeviceClass;
    use crate::status::Status;

    #[test]
    fn test_one_queue_per_device() {
        let backend = HostBackend::builder().gpus(3).build();
        let devices = backend.device_ids(DeviceClass::Gpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();
        let pool = QueuePool::create(&context, &devices).unwrap();

        assert_eq!(pool.len(), 3);
        for (i, queue) in pool.iter().enumerate() {
            assert_eq!(queue.index(), i);
            assert_eq!(queue.device(), &devices[i]);
        }
        assert!(pool.finish_all().is_ok());
    }

    #[test]
    fn test_partial_failure_is_fatal() {
        let backend = HostBackend::builder()
            .gpus(3)
            .fail_queue(DeviceClass::Gpu, 1, Status::OUT_OF_HOST_MEMORY)
            .build();
        let devices = backend.device_ids(DeviceClass::Gpu, None).unwrap();
        let context = ComputeContext::create(&backend, &devices).unwrap();

        let err = QueuePool::create(&context, &devices).unwrap_err();
        assert!(matches!(err, Error::QueueCreationFailed { device: 1, .. }));

        let resources = backend.resources();
        assert_eq!(resources.queues_created, 1);
        assert_eq!(resources.live_queues, 0);
    }
}
