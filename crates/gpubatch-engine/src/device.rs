//! The seam between the submission engine and the layers it orchestrates.
//!
//! Everything the engine needs from the device/adapter layer, the
//! pipeline/shader layer, the recording primitives and the query pools is
//! expressed on [`Device`]. Handles are raw `ash::vk` handles; ownership of
//! those handles is tracked by the engine's pools and cleanup queues, never
//! by the implementor.

use ash::vk;

use gpubatch_core::DescriptorPoolConfig;

use crate::error::Result;
use crate::resource::{BufferKind, ImageDesc, PipelineBarrier, VulkanBuffer, VulkanImage};
use crate::shader::ShaderSource;
use crate::utils::UVec3;

/// Pipeline objects resolved for a shader + local work-group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
}

/// The resource written into one descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: DescriptorResource,
}

pub trait Device: Send + Sync {
    /// Human readable adapter name.
    fn name(&self) -> &str;

    // ── Command pools ───────────────────────────────────────

    fn create_command_pool(&self) -> Result<vk::CommandPool>;

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;

    /// Return every buffer allocated from `pool` to the initial state.
    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()>;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    // ── Recording ───────────────────────────────────────────

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, barrier: &PipelineBarrier);

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    );

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    );

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    );

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    );

    fn cmd_bind_compute_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: UVec3);

    fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    );

    fn cmd_write_timestamp(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32);

    // ── Descriptors ─────────────────────────────────────────

    fn create_descriptor_pool(&self, config: &DescriptorPoolConfig)
        -> Result<vk::DescriptorPool>;

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>>;

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()>;

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // ── Fences ──────────────────────────────────────────────

    fn create_fence(&self) -> Result<vk::Fence>;

    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;

    fn destroy_fence(&self, fence: vk::Fence);

    // ── Queue ───────────────────────────────────────────────

    /// Submit one command buffer; `fence` may be null.
    fn queue_submit(&self, cmd: vk::CommandBuffer, fence: vk::Fence) -> Result<()>;

    fn queue_wait_idle(&self) -> Result<()>;

    // ── Memory ──────────────────────────────────────────────

    fn create_buffer(&self, size: vk::DeviceSize, kind: BufferKind) -> Result<VulkanBuffer>;

    /// Copy `bytes` into the start of a host-visible buffer.
    fn write_buffer(&self, buffer: &VulkanBuffer, bytes: &[u8]) -> Result<()>;

    fn destroy_buffer(&self, buffer: VulkanBuffer);

    fn create_image(&self, desc: &ImageDesc) -> Result<VulkanImage>;

    fn destroy_image(&self, image: VulkanImage);

    // ── Pipelines ───────────────────────────────────────────

    /// Resolve (creating and caching on first use) the pipeline for `shader`
    /// specialized to `local_work_group`.
    fn compute_pipeline(
        &self,
        shader: &ShaderSource,
        local_work_group: UVec3,
    ) -> Result<ComputePipeline>;

    // ── Diagnostics ─────────────────────────────────────────

    fn create_query_pool(&self, count: u32) -> Result<vk::QueryPool>;

    /// Read `out.len()` 64-bit timestamps starting at `first`.
    fn query_timestamps(&self, pool: vk::QueryPool, first: u32, out: &mut [u64]) -> Result<()>;

    fn destroy_query_pool(&self, pool: vk::QueryPool);

    /// Nanoseconds per timestamp tick.
    fn timestamp_period(&self) -> f32;
}
