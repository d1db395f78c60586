//! GPU memory objects and synchronization directives.
//!
//! `VulkanBuffer` and `VulkanImage` are plain owned records: they carry the
//! raw handles and memory but have no `Drop`. They are released either
//! directly through [`Device::destroy_buffer`](crate::Device::destroy_buffer)
//! or, for anything that may still be referenced by recorded GPU work, by
//! moving them into the context's cleanup queues.

use ash::vk;

use crate::utils::UVec3;

/// What a buffer is allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Storage buffer. `gpu_only` buffers live in device-local memory and
    /// cannot be mapped.
    Storage { gpu_only: bool },
    /// Host-visible uniform block.
    Uniform,
    /// Host-visible transfer source/destination.
    Staging,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        match self {
            BufferKind::Storage { .. } => vk::BufferUsageFlags::STORAGE_BUFFER | transfer,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => transfer,
        }
    }

    pub fn host_visible(self) -> bool {
        !matches!(self, BufferKind::Storage { gpu_only: true })
    }
}

/// A device buffer together with its backing memory.
#[derive(Debug, PartialEq, Eq)]
pub struct VulkanBuffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    kind: BufferKind,
}

impl VulkanBuffer {
    pub fn new(
        handle: vk::Buffer,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        kind: BufferKind,
    ) -> Self {
        Self {
            handle,
            memory,
            size,
            kind,
        }
    }

    /// A buffer that owns nothing. Used as the moved-from state of wrappers.
    pub fn null() -> Self {
        Self {
            handle: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 0,
            kind: BufferKind::Staging,
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle == vk::Buffer::null()
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

/// Creation parameters for [`VulkanImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub extent: UVec3,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// A 3D storage image usable as a copy source and destination.
    pub fn storage_3d(format: vk::Format, extent: UVec3) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_3D,
            view_type: vk::ImageViewType::TYPE_3D,
            format,
            extent,
            usage: vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }
}

/// A device image, its memory, its default view and an optional sampler.
///
/// The layout is tracked on the host: barriers that transition the image
/// are expected to be followed by [`VulkanImage::set_layout`].
#[derive(Debug, PartialEq, Eq)]
pub struct VulkanImage {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    format: vk::Format,
    extent: UVec3,
    layout: vk::ImageLayout,
}

impl VulkanImage {
    pub fn new(
        handle: vk::Image,
        memory: vk::DeviceMemory,
        view: vk::ImageView,
        sampler: vk::Sampler,
        format: vk::Format,
        extent: UVec3,
    ) -> Self {
        Self {
            handle,
            memory,
            view,
            sampler,
            format,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> UVec3 {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Barrier that moves this image into `new_layout`. Callers record the
    /// barrier and then call [`set_layout`](Self::set_layout).
    pub fn transition(
        &self,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> ImageMemoryBarrier {
        ImageMemoryBarrier {
            image: self.handle,
            old_layout: self.layout,
            new_layout,
            src_access,
            dst_access,
        }
    }
}

/// Element types a storage buffer may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    I32,
    F16,
    F32,
    I64,
    F64,
}

impl ScalarType {
    pub const fn element_size(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::F16 => 2,
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 => 8,
        }
    }
}

// ── Barriers ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    pub buffer: vk::Buffer,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferMemoryBarrier {
    /// Barrier over the whole of `buffer`.
    pub fn whole(
        buffer: &VulkanBuffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> Self {
        Self {
            buffer: buffer.handle(),
            src_access,
            dst_access,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Synchronization directive recorded ahead of a copy or dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineBarrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub buffers: Vec<BufferMemoryBarrier>,
    pub images: Vec<ImageMemoryBarrier>,
}

impl PipelineBarrier {
    /// A barrier that records nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn stages(src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags) -> Self {
        Self {
            src_stage,
            dst_stage,
            ..Self::default()
        }
    }

    pub fn with_buffer(mut self, barrier: BufferMemoryBarrier) -> Self {
        self.buffers.push(barrier);
        self
    }

    pub fn with_image(mut self, barrier: ImageMemoryBarrier) -> Self {
        self.images.push(barrier);
        self
    }

    /// Empty barriers are skipped instead of emitting a no-op
    /// `vkCmdPipelineBarrier`.
    pub fn is_empty(&self) -> bool {
        self.src_stage.is_empty()
            && self.dst_stage.is_empty()
            && self.buffers.is_empty()
            && self.images.is_empty()
    }
}
