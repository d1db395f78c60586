//! Decides when recorded work is handed to the queue.
//!
//! All operations recorded between two submissions land in one command
//! buffer. A submission happens when the caller attaches a fence or when
//! `submit_frequency` operations have been recorded, whichever comes first.
//! Both paths reset the operation counter.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::Result;

pub struct CommandBatcher {
    device: Arc<dyn Device>,
    pool: CommandPool,
    cmd: Option<CommandBuffer>,
    submit_count: u32,
    submit_frequency: u32,
    submissions: u64,
}

impl CommandBatcher {
    pub fn new(device: Arc<dyn Device>, pool: CommandPool, submit_frequency: u32) -> Self {
        debug_assert!(submit_frequency > 0);
        Self {
            device,
            pool,
            cmd: None,
            submit_count: 0,
            submit_frequency,
            submissions: 0,
        }
    }

    /// The command buffer currently recording, opening one if needed.
    pub fn ensure_open(&mut self) -> Result<&mut CommandBuffer> {
        let cmd = match self.cmd.take() {
            Some(cmd) => cmd,
            None => {
                let mut cmd = self.pool.get_new_cmd()?;
                cmd.begin()?;
                cmd
            }
        };
        Ok(self.cmd.insert(cmd))
    }

    pub fn is_open(&self) -> bool {
        self.cmd.is_some()
    }

    /// Count one fully recorded operation and submit if the batching policy
    /// says so. Returns whether a submission happened.
    pub fn record_completed(&mut self, fence: vk::Fence) -> Result<bool> {
        self.submit_count += 1;
        if fence != vk::Fence::null() || self.submit_count >= self.submit_frequency {
            return self.submit(fence);
        }
        Ok(false)
    }

    /// End and submit the open command buffer, if any, signalling `fence`
    /// (which may be null) on completion.
    pub fn submit(&mut self, fence: vk::Fence) -> Result<bool> {
        let Some(mut cmd) = self.cmd.take() else {
            return Ok(false);
        };
        // The batch is gone whether or not the queue accepts it.
        let operations = std::mem::take(&mut self.submit_count);
        if let Err(e) = cmd.end() {
            cmd.invalidate();
            return Err(e);
        }
        let handle = cmd.get_submit_handle();
        self.device.queue_submit(handle, fence)?;

        debug!(
            operations,
            fenced = fence != vk::Fence::null(),
            "submitted command buffer {:?}",
            handle
        );
        self.submissions += 1;
        Ok(true)
    }

    /// Recycle every command buffer. The queue must be idle.
    pub fn reset_pool(&mut self) -> Result<()> {
        debug_assert!(self.cmd.is_none(), "resetting pool with an open command buffer");
        self.pool.flush()
    }

    /// Throw away the open command buffer without submitting it.
    pub fn discard(&mut self) {
        if let Some(mut cmd) = self.cmd.take() {
            cmd.invalidate();
            self.submit_count = 0;
        }
    }

    /// Operations recorded since the last submission.
    pub fn submit_count(&self) -> u32 {
        self.submit_count
    }

    /// Submissions made over the batcher's lifetime.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }
}
