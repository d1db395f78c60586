use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::device::Device;
use crate::error::Result;

/// A host/device synchronization point.
///
/// A fence becomes "waiting" once it has been handed to a submission;
/// [`wait`](Self::wait) blocks until the device signals it.
pub struct VulkanFence {
    device: Arc<dyn Device>,
    handle: vk::Fence,
    waiting: bool,
}

impl VulkanFence {
    pub fn new(device: Arc<dyn Device>) -> Result<Self> {
        let handle = device.create_fence()?;
        Ok(Self {
            device,
            handle,
            waiting: false,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Mark the fence as in flight and return the raw handle for submission.
    pub fn get_submit_handle(&mut self) -> vk::Fence {
        debug_assert!(!self.waiting, "fence submitted twice without a wait");
        self.waiting = true;
        self.handle
    }

    /// Block until the submission this fence was attached to completes.
    /// A fence that was never submitted returns immediately.
    pub fn wait(&mut self) -> Result<()> {
        if self.waiting {
            self.device.wait_for_fence(self.handle, u64::MAX)?;
            self.waiting = false;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.wait()?;
        self.device.reset_fence(self.handle)
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.handle);
    }
}

/// Recycles fences so synchronized batches do not create one per call.
pub struct FencePool {
    device: Arc<dyn Device>,
    pool: Mutex<Vec<VulkanFence>>,
}

impl FencePool {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Pop an unsignaled fence, creating one if the pool is empty.
    pub fn get_fence(&self) -> Result<VulkanFence> {
        match self.pool.lock().pop() {
            Some(fence) => Ok(fence),
            None => VulkanFence::new(self.device.clone()),
        }
    }

    /// Reset `fence` and make it available again. Waits first if the fence
    /// is still in flight.
    pub fn return_fence(&self, mut fence: VulkanFence) -> Result<()> {
        fence.reset()?;
        self.pool.lock().push(fence);
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.pool.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Call, RecordingDevice};

    #[test]
    fn returned_fences_are_reset_and_reused() {
        let device = Arc::new(RecordingDevice::new());
        let pool = FencePool::new(device.clone());

        let mut fence = pool.get_fence().expect("fence");
        let handle = fence.handle();
        let submit = fence.get_submit_handle();
        device
            .queue_submit(vk::CommandBuffer::null(), submit)
            .expect("submit");

        // Returning an in-flight fence waits for it first
        pool.return_fence(fence).expect("return");
        let calls = device.calls();
        let wait = calls.iter().position(|c| *c == Call::WaitForFence(handle));
        let reset = calls.iter().position(|c| *c == Call::ResetFence(handle));
        assert!(wait.is_some() && wait < reset);

        let again = pool.get_fence().expect("fence");
        assert_eq!(again.handle(), handle);
        assert!(!again.is_waiting());
        assert_eq!(pool.available(), 0);
    }
}
