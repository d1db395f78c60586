//! Shared fixtures for the engine integration tests. Everything runs
//! against `RecordingDevice`, so no GPU is needed.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use gpubatch_engine::{
    BufferKind, BufferMemoryBarrier, Context, ContextConfig, Device, PipelineBarrier,
    RecordingDevice, ShaderSource, VulkanBuffer,
};

pub fn setup(submit_frequency: u32) -> (Arc<RecordingDevice>, Context) {
    let config = ContextConfig {
        cmd_submit_frequency: submit_frequency,
        ..ContextConfig::default()
    };
    setup_with(config)
}

pub fn setup_with(config: ContextConfig) -> (Arc<RecordingDevice>, Context) {
    gpubatch_common::try_init_logging();
    let device = Arc::new(RecordingDevice::new());
    let context = Context::new(device.clone(), config).expect("context creation");
    (device, context)
}

pub fn staging_buffer(device: &RecordingDevice, size: u64) -> VulkanBuffer {
    device
        .create_buffer(size, BufferKind::Staging)
        .expect("buffer creation")
}

/// A transfer→transfer barrier over the whole of `buffer`, so the barrier
/// in the call log identifies the copy it guards.
pub fn transfer_barrier(buffer: &VulkanBuffer) -> PipelineBarrier {
    PipelineBarrier::stages(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
    )
    .with_buffer(BufferMemoryBarrier::whole(
        buffer,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::AccessFlags::TRANSFER_READ,
    ))
}

/// Copy 64 bytes from `src` to `dst` through the context.
pub fn copy(context: &Context, src: &VulkanBuffer, dst: &VulkanBuffer) {
    context
        .submit_copy(
            &transfer_barrier(src),
            src,
            dst,
            [64, 1, 1],
            [0, 0, 0],
            [0, 0, 0],
        )
        .expect("copy recording");
}

/// `c = a + b` over storage buffers with a uniform parameter block.
pub fn add_shader() -> ShaderSource {
    ShaderSource::new(
        "binary_add",
        vec![0x0723_0203],
        vec![
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::UNIFORM_BUFFER,
        ],
    )
}
