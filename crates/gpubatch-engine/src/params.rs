//! Buffers owned by host-side handles whose destruction is deferred.
//!
//! Dropping either wrapper never frees GPU memory directly: the buffer may
//! still be read or written by a batch that has been submitted without a
//! fence. It is moved into the owning context's cleanup queue and released
//! at the next flush.

use ash::vk;

use crate::context::Context;
use crate::descriptor::Bindable;
use crate::device::DescriptorResource;
use crate::error::{EngineError, Result};
use crate::resource::{BufferKind, ScalarType, VulkanBuffer};

/// A uniform buffer holding one `Pod` parameter block.
pub struct UniformParamsBuffer<'a> {
    context: &'a Context,
    buffer: VulkanBuffer,
}

impl<'a> UniformParamsBuffer<'a> {
    pub fn new<B: bytemuck::Pod>(context: &'a Context, block: &B) -> Result<Self> {
        let bytes = bytemuck::bytes_of(block);
        let device = context.device();
        let buffer = device.create_buffer(bytes.len() as vk::DeviceSize, BufferKind::Uniform)?;
        // Never recorded yet, so it can be released immediately.
        if let Err(e) = device.write_buffer(&buffer, bytes) {
            device.destroy_buffer(buffer);
            return Err(e);
        }
        Ok(Self { context, buffer })
    }

    pub fn buffer(&self) -> &VulkanBuffer {
        &self.buffer
    }

    /// Take the buffer out of the wrapper. The caller becomes responsible
    /// for releasing it.
    pub fn into_inner(mut self) -> VulkanBuffer {
        std::mem::replace(&mut self.buffer, VulkanBuffer::null())
    }
}

impl Bindable for UniformParamsBuffer<'_> {
    fn descriptor(&self) -> DescriptorResource {
        self.buffer.descriptor()
    }
}

impl Drop for UniformParamsBuffer<'_> {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            let buffer = std::mem::replace(&mut self.buffer, VulkanBuffer::null());
            self.context.register_buffer_cleanup(buffer);
        }
    }
}

/// A storage buffer sized for `numel` elements of `dtype`.
pub struct StorageBuffer<'a> {
    context: &'a Context,
    dtype: ScalarType,
    numel: usize,
    buffer: VulkanBuffer,
}

impl<'a> StorageBuffer<'a> {
    pub fn new(
        context: &'a Context,
        dtype: ScalarType,
        numel: usize,
        gpu_only: bool,
    ) -> Result<Self> {
        let nbytes = dtype.element_size() * numel;
        if nbytes == 0 {
            return Err(EngineError::Unsupported(
                "storage buffer with zero elements".to_string(),
            ));
        }
        let buffer = context
            .device()
            .create_buffer(nbytes as vk::DeviceSize, BufferKind::Storage { gpu_only })?;
        Ok(Self {
            context,
            dtype,
            numel,
            buffer,
        })
    }

    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    pub fn numel(&self) -> usize {
        self.numel
    }

    pub fn nbytes(&self) -> usize {
        self.dtype.element_size() * self.numel
    }

    pub fn buffer(&self) -> &VulkanBuffer {
        &self.buffer
    }
}

impl Bindable for StorageBuffer<'_> {
    fn descriptor(&self) -> DescriptorResource {
        self.buffer.descriptor()
    }
}

impl Drop for StorageBuffer<'_> {
    fn drop(&mut self) {
        let buffer = std::mem::replace(&mut self.buffer, VulkanBuffer::null());
        self.context.register_buffer_cleanup(buffer);
    }
}
