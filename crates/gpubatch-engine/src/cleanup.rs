//! Deferred release of GPU memory.
//!
//! Resources are moved into a queue when their host-side owner goes away
//! and are destroyed only when the owning context drains the queue at a
//! point where the device is known to be idle. Draining is always an
//! explicit, synchronous call.

use parking_lot::Mutex;
use tracing::debug;

use crate::device::Device;
use crate::resource::{VulkanBuffer, VulkanImage};

/// A resource class that can be handed back to the device.
pub trait Release: Send {
    const KIND: &'static str;

    fn release(self, device: &dyn Device);
}

impl Release for VulkanBuffer {
    const KIND: &'static str = "buffer";

    fn release(self, device: &dyn Device) {
        device.destroy_buffer(self);
    }
}

impl Release for VulkanImage {
    const KIND: &'static str = "image";

    fn release(self, device: &dyn Device) {
        device.destroy_image(self);
    }
}

/// Resources of one class awaiting release, behind a lock of their own.
pub struct CleanupQueue<T> {
    pending: Mutex<Vec<T>>,
}

impl<T: Release> CleanupQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Take ownership of `resource` until the next drain.
    pub fn register(&self, resource: T) {
        self.pending.lock().push(resource);
    }

    /// Release everything registered so far. Returns the number released.
    ///
    /// The caller guarantees the device no longer references any of the
    /// queued resources.
    pub fn drain(&self, device: &dyn Device) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for resource in drained {
            resource.release(device);
        }
        if count > 0 {
            debug!("released {} deferred {}(s)", count, T::KIND);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl<T: Release> Default for CleanupQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
