//! Command submission engine for Vulkan compute and copy work.
//!
//! A [`Context`] owns one shared command buffer into which copies and
//! compute dispatches from any thread are recorded under a single lock.
//! Recorded operations are batched and handed to the queue either when a
//! configured number of them has accumulated or when the caller asks for a
//! fence. Buffers and images released by their owners are parked in cleanup
//! queues and destroyed only when the context is flushed.
//!
//! The engine talks to the GPU exclusively through the [`Device`] trait.
//! [`VulkanDevice`] implements it on top of `ash`; [`RecordingDevice`]
//! implements it on the host and logs every call, which is what the tests
//! use.

pub mod batch;
pub mod cleanup;
pub mod command;
pub mod context;
pub mod copy;
pub mod descriptor;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod fence;
pub mod params;
pub mod recording;
pub mod resource;
pub mod runtime;
pub mod shader;
pub mod utils;
pub mod vulkan;

pub use batch::CommandBatcher;
pub use cleanup::{CleanupQueue, Release};
pub use command::{CommandBuffer, CommandBufferState, CommandPool};
pub use context::{Context, SyncBatch};
pub use copy::RecordCopy;
pub use descriptor::{Bindable, DescriptorPool, DescriptorSet};
pub use device::{ComputePipeline, DescriptorResource, DescriptorWrite, Device};
pub use diagnostics::{QueryPool, ShaderDuration};
pub use error::{EngineError, Result};
pub use fence::{FencePool, VulkanFence};
pub use params::{StorageBuffer, UniformParamsBuffer};
pub use recording::{Call, RecordingDevice};
pub use resource::{
    BufferKind, BufferMemoryBarrier, ImageDesc, ImageMemoryBarrier, PipelineBarrier, ScalarType,
    VulkanBuffer, VulkanImage,
};
pub use shader::ShaderSource;
pub use utils::UVec3;
pub use vulkan::VulkanDevice;

pub use gpubatch_core::{CommandPoolConfig, ContextConfig, DescriptorPoolConfig, QueryPoolConfig};
