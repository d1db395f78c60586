//! Copy recording over the closed set of {buffer, image} pairs.
//!
//! `RecordCopy<D>` is implemented for exactly four source/destination
//! combinations and is sealed, so an unsupported pair is a type error at
//! the call site:
//!
//! ```compile_fail
//! use gpubatch_engine::{CommandBuffer, RecordCopy, VulkanBuffer};
//!
//! fn copy_scalar(cmd: &mut CommandBuffer, src: &VulkanBuffer, dst: &u32) {
//!     src.record_copy(cmd, dst, [4, 1, 1], [0, 0, 0], [0, 0, 0]);
//! }
//! ```

use ash::vk;

use crate::command::CommandBuffer;
use crate::resource::{VulkanBuffer, VulkanImage};
use crate::utils::{extent3d, offset3d, UVec3};

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::VulkanBuffer {}
    impl Sealed for super::VulkanImage {}
}

/// Records a copy from `Self` into `D`.
///
/// For buffers only the first component of `range` and of the offsets is
/// meaningful (byte count and byte offsets). For images they are texel
/// extents and offsets.
pub trait RecordCopy<D>: sealed::Sealed {
    fn record_copy(
        &self,
        cmd: &mut CommandBuffer,
        dst: &D,
        range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    );
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn buffer_image_region(buffer_offset: u32, image_offset: UVec3, range: UVec3) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: u64::from(buffer_offset),
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: color_layers(),
        image_offset: offset3d(image_offset),
        image_extent: extent3d(range),
    }
}

impl RecordCopy<VulkanBuffer> for VulkanBuffer {
    fn record_copy(
        &self,
        cmd: &mut CommandBuffer,
        dst: &VulkanBuffer,
        range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    ) {
        let region = vk::BufferCopy {
            src_offset: u64::from(src_offset[0]),
            dst_offset: u64::from(dst_offset[0]),
            size: u64::from(range[0]),
        };
        cmd.copy_buffer(self.handle(), dst.handle(), region);
    }
}

impl RecordCopy<VulkanImage> for VulkanImage {
    fn record_copy(
        &self,
        cmd: &mut CommandBuffer,
        dst: &VulkanImage,
        range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    ) {
        let region = vk::ImageCopy {
            src_subresource: color_layers(),
            src_offset: offset3d(src_offset),
            dst_subresource: color_layers(),
            dst_offset: offset3d(dst_offset),
            extent: extent3d(range),
        };
        cmd.copy_image(
            self.handle(),
            self.layout(),
            dst.handle(),
            dst.layout(),
            region,
        );
    }
}

impl RecordCopy<VulkanBuffer> for VulkanImage {
    fn record_copy(
        &self,
        cmd: &mut CommandBuffer,
        dst: &VulkanBuffer,
        range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    ) {
        let region = buffer_image_region(dst_offset[0], src_offset, range);
        cmd.copy_image_to_buffer(self.handle(), self.layout(), dst.handle(), region);
    }
}

impl RecordCopy<VulkanImage> for VulkanBuffer {
    fn record_copy(
        &self,
        cmd: &mut CommandBuffer,
        dst: &VulkanImage,
        range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    ) {
        let region = buffer_image_region(src_offset[0], dst_offset, range);
        cmd.copy_buffer_to_image(self.handle(), dst.handle(), dst.layout(), region);
    }
}
