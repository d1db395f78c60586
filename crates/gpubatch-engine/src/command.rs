//! Command buffers and the pool they are drawn from.
//!
//! A `CommandBuffer` tracks where it is in its recording lifecycle so that
//! out-of-order recording is caught in debug builds. Buffers handed out by
//! the pool are only reused after the pool is flushed, which happens once
//! the queue has gone idle.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use gpubatch_core::CommandPoolConfig;

use crate::device::{ComputePipeline, Device};
use crate::error::{EngineError, Result};
use crate::resource::PipelineBarrier;
use crate::utils::{effective_work_groups, UVec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Invalid,
    New,
    Recording,
    PipelineBound,
    DescriptorsBound,
    BarriersInserted,
    Ready,
    Submitted,
}

pub struct CommandBuffer {
    device: Arc<dyn Device>,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
    bound_pipeline: vk::Pipeline,
    bound_layout: vk::PipelineLayout,
    bound_local: UVec3,
}

impl CommandBuffer {
    fn new(device: Arc<dyn Device>, handle: vk::CommandBuffer) -> Self {
        Self {
            device,
            handle,
            state: CommandBufferState::New,
            bound_pipeline: vk::Pipeline::null(),
            bound_layout: vk::PipelineLayout::null(),
            bound_local: [0, 0, 0],
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn begin(&mut self) -> Result<()> {
        debug_assert_eq!(
            self.state,
            CommandBufferState::New,
            "command buffer begun twice"
        );
        self.device.begin_command_buffer(self.handle)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "command buffer ended mid-operation"
        );
        self.device.end_command_buffer(self.handle)?;
        self.state = CommandBufferState::Ready;
        Ok(())
    }

    /// Bind a compute pipeline. Rebinding the pipeline that is already bound
    /// is skipped.
    pub fn bind_pipeline(&mut self, pipeline: &ComputePipeline, local_work_group: UVec3) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        if pipeline.pipeline != self.bound_pipeline {
            self.device
                .cmd_bind_compute_pipeline(self.handle, pipeline.pipeline);
            self.bound_pipeline = pipeline.pipeline;
        }
        self.bound_layout = pipeline.layout;
        self.bound_local = local_work_group;
        self.state = CommandBufferState::PipelineBound;
    }

    pub fn bind_descriptors(&mut self, set: vk::DescriptorSet) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::PipelineBound,
            "descriptors bound without a pipeline"
        );
        self.device
            .cmd_bind_descriptor_set(self.handle, self.bound_layout, set);
        self.state = CommandBufferState::DescriptorsBound;
    }

    pub fn insert_barrier(&mut self, barrier: &PipelineBarrier) {
        debug_assert!(matches!(
            self.state,
            CommandBufferState::Recording | CommandBufferState::DescriptorsBound
        ));
        if !barrier.is_empty() {
            self.device.cmd_pipeline_barrier(self.handle, barrier);
        }
        self.state = CommandBufferState::BarriersInserted;
    }

    /// Dispatch enough work groups of the bound local size to cover
    /// `global` invocations.
    pub fn dispatch(&mut self, global: UVec3) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::BarriersInserted,
            "dispatch recorded before its barrier"
        );
        debug_assert!(self.bound_local.iter().all(|&l| l > 0));
        let groups = effective_work_groups(global, self.bound_local);
        self.device.cmd_dispatch(self.handle, groups);
        self.state = CommandBufferState::Recording;
    }

    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        self.before_copy();
        self.device.cmd_copy_buffer(self.handle, src, dst, region);
        self.state = CommandBufferState::Recording;
    }

    pub fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) {
        self.before_copy();
        self.device
            .cmd_copy_image(self.handle, src, src_layout, dst, dst_layout, region);
        self.state = CommandBufferState::Recording;
    }

    pub fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    ) {
        self.before_copy();
        self.device
            .cmd_copy_image_to_buffer(self.handle, src, src_layout, dst, region);
        self.state = CommandBufferState::Recording;
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        self.before_copy();
        self.device
            .cmd_copy_buffer_to_image(self.handle, src, dst, dst_layout, region);
        self.state = CommandBufferState::Recording;
    }

    pub fn write_timestamp(&mut self, pool: vk::QueryPool, query: u32) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        self.device.cmd_write_timestamp(self.handle, pool, query);
    }

    pub fn reset_query_pool(&mut self, pool: vk::QueryPool, count: u32) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        self.device.cmd_reset_query_pool(self.handle, pool, 0, count);
    }

    /// Hand the finished buffer over for queue submission.
    pub fn get_submit_handle(&mut self) -> vk::CommandBuffer {
        debug_assert_eq!(
            self.state,
            CommandBufferState::Ready,
            "submitting a command buffer that was not ended"
        );
        self.state = CommandBufferState::Submitted;
        self.handle
    }

    /// Drop any recorded work without submitting it.
    pub fn invalidate(&mut self) {
        self.state = CommandBufferState::Invalid;
        self.bound_pipeline = vk::Pipeline::null();
    }

    fn before_copy(&self) {
        debug_assert_eq!(
            self.state,
            CommandBufferState::BarriersInserted,
            "copy recorded before its barrier"
        );
    }
}

/// Hands out primary command buffers, growing in fixed-size batches.
pub struct CommandPool {
    device: Arc<dyn Device>,
    pool: vk::CommandPool,
    config: CommandPoolConfig,
    buffers: Vec<vk::CommandBuffer>,
    in_use: usize,
}

impl CommandPool {
    pub fn new(device: Arc<dyn Device>, config: CommandPoolConfig) -> Result<Self> {
        let pool = device.create_command_pool()?;
        let mut this = Self {
            device,
            pool,
            config,
            buffers: Vec::new(),
            in_use: 0,
        };
        if this.config.initial_size > 0 {
            this.allocate_batch(this.config.initial_size)?;
        }
        Ok(this)
    }

    /// Take the next unused command buffer, allocating another batch if
    /// every buffer has been handed out since the last flush.
    pub fn get_new_cmd(&mut self) -> Result<CommandBuffer> {
        if self.in_use >= self.buffers.len() {
            self.allocate_batch(self.config.batch_size)?;
        }
        let handle = self.buffers[self.in_use];
        self.in_use += 1;
        Ok(CommandBuffer::new(self.device.clone(), handle))
    }

    /// Reset every buffer in the pool. Only valid once the device has
    /// finished with all of them.
    pub fn flush(&mut self) -> Result<()> {
        self.device.reset_command_pool(self.pool)?;
        self.in_use = 0;
        Ok(())
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    fn allocate_batch(&mut self, count: u32) -> Result<()> {
        let batch = self.device.allocate_command_buffers(self.pool, count)?;
        if batch.is_empty() {
            return Err(EngineError::allocation(
                "command buffer",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        debug!(
            "allocated {} command buffer(s), pool capacity {}",
            batch.len(),
            self.buffers.len() + batch.len()
        );
        self.buffers.extend(batch);
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}
