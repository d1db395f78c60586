//! A host-only [`Device`] that records every call instead of talking to a
//! GPU.
//!
//! Handles are fabricated from a counter, so they are unique and never
//! null. The call log keeps global order, which makes it possible to check
//! batching decisions, binding order and release counts without hardware.
//! Some device behaviour is emulated where the engine depends on it:
//! descriptor pools run out after `max_sets`, fences must be submitted
//! before they can be waited on, and failures can be injected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;
use dashmap::DashMap;
use parking_lot::Mutex;

use gpubatch_core::DescriptorPoolConfig;

use crate::device::{ComputePipeline, DescriptorWrite, Device};
use crate::error::{EngineError, Result};
use crate::resource::{BufferKind, ImageDesc, PipelineBarrier, VulkanBuffer, VulkanImage};
use crate::shader::ShaderSource;
use crate::utils::UVec3;

/// One logged device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateCommandPool(vk::CommandPool),
    AllocateCommandBuffers { pool: vk::CommandPool, count: u32 },
    ResetCommandPool(vk::CommandPool),
    DestroyCommandPool(vk::CommandPool),
    Begin(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Barrier {
        cmd: vk::CommandBuffer,
        barrier: PipelineBarrier,
    },
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyImage {
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        extent: UVec3,
    },
    CopyImageToBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        buffer_offset: u64,
        extent: UVec3,
    },
    CopyBufferToImage {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        buffer_offset: u64,
        extent: UVec3,
    },
    BindPipeline {
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
    },
    Dispatch {
        cmd: vk::CommandBuffer,
        groups: UVec3,
    },
    ResetQueryPool {
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
    },
    WriteTimestamp {
        cmd: vk::CommandBuffer,
        query: u32,
    },
    CreateDescriptorPool(vk::DescriptorPool),
    AllocateDescriptorSets {
        layout: vk::DescriptorSetLayout,
        count: u32,
    },
    ResetDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    UpdateDescriptorSet {
        set: vk::DescriptorSet,
        writes: Vec<DescriptorWrite>,
    },
    CreateFence(vk::Fence),
    ResetFence(vk::Fence),
    WaitForFence(vk::Fence),
    DestroyFence(vk::Fence),
    Submit {
        cmd: vk::CommandBuffer,
        fence: vk::Fence,
    },
    WaitIdle,
    CreateBuffer(vk::Buffer),
    WriteBuffer {
        buffer: vk::Buffer,
        len: usize,
    },
    DestroyBuffer(vk::Buffer),
    CreateImage(vk::Image),
    DestroyImage(vk::Image),
    CreatePipeline {
        kernel: String,
        pipeline: vk::Pipeline,
    },
    CreateQueryPool(vk::QueryPool),
    DestroyQueryPool(vk::QueryPool),
}

impl Call {
    /// The command buffer a recording call was made into.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        match self {
            Call::Begin(cmd) | Call::End(cmd) => Some(*cmd),
            Call::Barrier { cmd, .. }
            | Call::CopyBuffer { cmd, .. }
            | Call::CopyImage { cmd, .. }
            | Call::CopyImageToBuffer { cmd, .. }
            | Call::CopyBufferToImage { cmd, .. }
            | Call::BindPipeline { cmd, .. }
            | Call::BindDescriptorSet { cmd, .. }
            | Call::Dispatch { cmd, .. }
            | Call::ResetQueryPool { cmd, .. }
            | Call::WriteTimestamp { cmd, .. } => Some(*cmd),
            _ => None,
        }
    }

    /// True for the payload of a copy or dispatch.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            Call::CopyBuffer { .. }
                | Call::CopyImage { .. }
                | Call::CopyImageToBuffer { .. }
                | Call::CopyBufferToImage { .. }
                | Call::Dispatch { .. }
        )
    }
}

#[derive(Default)]
struct Injected {
    submit: Option<vk::Result>,
    buffer_limit: Option<usize>,
}

pub struct RecordingDevice {
    name: String,
    next_handle: AtomicU64,
    calls: Mutex<Vec<Call>>,
    pipelines: DashMap<(String, UVec3), ComputePipeline>,
    descriptor_limits: DashMap<vk::DescriptorPool, (u32, u32)>,
    signaled: Mutex<HashSet<vk::Fence>>,
    live_buffers: Mutex<HashSet<vk::Buffer>>,
    live_images: Mutex<HashSet<vk::Image>>,
    buffer_contents: Mutex<HashMap<vk::Buffer, Vec<u8>>>,
    injected: Mutex<Injected>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            name: "recording device".to_string(),
            // Start from 1 so no fabricated handle is ever null
            next_handle: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            pipelines: DashMap::new(),
            descriptor_limits: DashMap::new(),
            signaled: Mutex::new(HashSet::new()),
            live_buffers: Mutex::new(HashSet::new()),
            live_images: Mutex::new(HashSet::new()),
            buffer_contents: Mutex::new(HashMap::new()),
            injected: Mutex::new(Injected::default()),
        }
    }

    /// Snapshot of every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// `(command buffer, fence)` for every queue submission, in order.
    pub fn submissions(&self) -> Vec<(vk::CommandBuffer, vk::Fence)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Submit { cmd, fence } => Some((*cmd, *fence)),
                _ => None,
            })
            .collect()
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.lock().len()
    }

    pub fn live_images(&self) -> usize {
        self.live_images.lock().len()
    }

    pub fn is_buffer_live(&self, buffer: vk::Buffer) -> bool {
        self.live_buffers.lock().contains(&buffer)
    }

    /// Bytes last written to `buffer` through [`Device::write_buffer`].
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.buffer_contents.lock().get(&buffer).cloned()
    }

    /// Make the next queue submission fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.injected.lock().submit = Some(result);
    }

    /// Fail buffer creation with out-of-device-memory once `limit` buffers
    /// are alive.
    pub fn limit_buffers(&self, limit: usize) {
        self.injected.lock().buffer_limit = Some(limit);
    }

    fn alloc<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn log(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for RecordingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    // ── Command pools ───────────────────────────────────────

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let pool = self.alloc();
        self.log(Call::CreateCommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        self.log(Call::AllocateCommandBuffers { pool, count });
        Ok((0..count).map(|_| self.alloc()).collect())
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()> {
        self.log(Call::ResetCommandPool(pool));
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.log(Call::DestroyCommandPool(pool));
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.log(Call::Begin(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.log(Call::End(cmd));
        Ok(())
    }

    // ── Recording ───────────────────────────────────────────

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, barrier: &PipelineBarrier) {
        self.log(Call::Barrier {
            cmd,
            barrier: barrier.clone(),
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.log(Call::CopyBuffer {
            cmd,
            src,
            dst,
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        });
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) {
        self.log(Call::CopyImage {
            cmd,
            src,
            dst,
            extent: [region.extent.width, region.extent.height, region.extent.depth],
        });
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    ) {
        let e = region.image_extent;
        self.log(Call::CopyImageToBuffer {
            cmd,
            src,
            dst,
            buffer_offset: region.buffer_offset,
            extent: [e.width, e.height, e.depth],
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        let e = region.image_extent;
        self.log(Call::CopyBufferToImage {
            cmd,
            src,
            dst,
            buffer_offset: region.buffer_offset,
            extent: [e.width, e.height, e.depth],
        });
    }

    fn cmd_bind_compute_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.log(Call::BindPipeline { cmd, pipeline });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.log(Call::BindDescriptorSet { cmd, set });
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: UVec3) {
        self.log(Call::Dispatch { cmd, groups });
    }

    fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        _first: u32,
        _count: u32,
    ) {
        self.log(Call::ResetQueryPool { cmd, pool });
    }

    fn cmd_write_timestamp(&self, cmd: vk::CommandBuffer, _pool: vk::QueryPool, query: u32) {
        self.log(Call::WriteTimestamp { cmd, query });
    }

    // ── Descriptors ─────────────────────────────────────────

    fn create_descriptor_pool(
        &self,
        config: &DescriptorPoolConfig,
    ) -> Result<vk::DescriptorPool> {
        let pool = self.alloc();
        self.descriptor_limits.insert(pool, (0, config.max_sets));
        self.log(Call::CreateDescriptorPool(pool));
        Ok(pool)
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut limits = self
            .descriptor_limits
            .get_mut(&pool)
            .ok_or(EngineError::from_vk("vkAllocateDescriptorSets", vk::Result::ERROR_UNKNOWN))?;
        let (allocated, max_sets) = *limits;
        if allocated + count > max_sets {
            return Err(EngineError::allocation(
                "descriptor set",
                vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            ));
        }
        *limits = (allocated + count, max_sets);
        drop(limits);

        self.log(Call::AllocateDescriptorSets { layout, count });
        Ok((0..count).map(|_| self.alloc()).collect())
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        if let Some(mut limits) = self.descriptor_limits.get_mut(&pool) {
            limits.0 = 0;
        }
        self.log(Call::ResetDescriptorPool(pool));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.descriptor_limits.remove(&pool);
        self.log(Call::DestroyDescriptorPool(pool));
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.log(Call::UpdateDescriptorSet {
            set,
            writes: writes.to_vec(),
        });
    }

    // ── Fences ──────────────────────────────────────────────

    fn create_fence(&self) -> Result<vk::Fence> {
        let fence = self.alloc();
        self.log(Call::CreateFence(fence));
        Ok(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.signaled.lock().remove(&fence);
        self.log(Call::ResetFence(fence));
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        self.log(Call::WaitForFence(fence));
        // Submissions complete instantly, so a fence that was never
        // submitted would block forever on a real device.
        if !self.signaled.lock().contains(&fence) {
            return Err(EngineError::from_vk("vkWaitForFences", vk::Result::TIMEOUT));
        }
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.signaled.lock().remove(&fence);
        self.log(Call::DestroyFence(fence));
    }

    // ── Queue ───────────────────────────────────────────────

    fn queue_submit(&self, cmd: vk::CommandBuffer, fence: vk::Fence) -> Result<()> {
        if let Some(result) = self.injected.lock().submit.take() {
            return Err(match result {
                vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                    EngineError::from_vk("vkQueueSubmit", result)
                }
                _ => EngineError::Submission(result),
            });
        }
        if fence != vk::Fence::null() {
            self.signaled.lock().insert(fence);
        }
        self.log(Call::Submit { cmd, fence });
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        self.log(Call::WaitIdle);
        Ok(())
    }

    // ── Memory ──────────────────────────────────────────────

    fn create_buffer(&self, size: vk::DeviceSize, kind: BufferKind) -> Result<VulkanBuffer> {
        let mut live = self.live_buffers.lock();
        if let Some(limit) = self.injected.lock().buffer_limit {
            if live.len() >= limit {
                return Err(EngineError::allocation(
                    "buffer",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
        }
        let buffer = VulkanBuffer::new(self.alloc(), self.alloc(), size, kind);
        live.insert(buffer.handle());
        drop(live);

        self.log(Call::CreateBuffer(buffer.handle()));
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, bytes: &[u8]) -> Result<()> {
        if !buffer.kind().host_visible() || bytes.len() as u64 > buffer.size() {
            return Err(EngineError::from_vk(
                "vkMapMemory",
                vk::Result::ERROR_MEMORY_MAP_FAILED,
            ));
        }
        self.buffer_contents
            .lock()
            .insert(buffer.handle(), bytes.to_vec());
        self.log(Call::WriteBuffer {
            buffer: buffer.handle(),
            len: bytes.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        let removed = self.live_buffers.lock().remove(&buffer.handle());
        debug_assert!(removed, "buffer {:?} released twice", buffer.handle());
        self.buffer_contents.lock().remove(&buffer.handle());
        self.log(Call::DestroyBuffer(buffer.handle()));
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<VulkanImage> {
        let image = VulkanImage::new(
            self.alloc(),
            self.alloc(),
            self.alloc(),
            vk::Sampler::null(),
            desc.format,
            desc.extent,
        );
        self.live_images.lock().insert(image.handle());
        self.log(Call::CreateImage(image.handle()));
        Ok(image)
    }

    fn destroy_image(&self, image: VulkanImage) {
        let removed = self.live_images.lock().remove(&image.handle());
        debug_assert!(removed, "image {:?} released twice", image.handle());
        self.log(Call::DestroyImage(image.handle()));
    }

    // ── Pipelines ───────────────────────────────────────────

    fn compute_pipeline(
        &self,
        shader: &ShaderSource,
        local_work_group: UVec3,
    ) -> Result<ComputePipeline> {
        let key = (shader.kernel_name.clone(), local_work_group);
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(*pipeline);
        }
        let pipeline = ComputePipeline {
            pipeline: self.alloc(),
            layout: self.alloc(),
            descriptor_set_layout: self.alloc(),
        };
        self.pipelines.insert(key, pipeline);
        self.log(Call::CreatePipeline {
            kernel: shader.kernel_name.clone(),
            pipeline: pipeline.pipeline,
        });
        Ok(pipeline)
    }

    // ── Diagnostics ─────────────────────────────────────────

    fn create_query_pool(&self, _count: u32) -> Result<vk::QueryPool> {
        let pool = self.alloc();
        self.log(Call::CreateQueryPool(pool));
        Ok(pool)
    }

    fn query_timestamps(&self, _pool: vk::QueryPool, first: u32, out: &mut [u64]) -> Result<()> {
        // Each query lands 1000 ticks after the previous one.
        for (i, tick) in out.iter_mut().enumerate() {
            *tick = (u64::from(first) + i as u64) * 1000;
        }
        Ok(())
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.log(Call::DestroyQueryPool(pool));
    }

    fn timestamp_period(&self) -> f32 {
        1.0
    }
}
