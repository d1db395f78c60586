//! The submission context: the single owner of the recording command
//! buffer, the resource pools and the deferred-cleanup queues.
//!
//! Recording is serialized by one lock. Plain [`Context::submit_copy`] and
//! [`Context::submit_compute_job`] take that lock for the duration of one
//! operation. Work that must end in a host/device synchronization point is
//! recorded through a [`SyncBatch`], which holds the lock from
//! [`Context::begin_synchronized`] until [`SyncBatch::flush`], so nothing
//! from other threads can be interleaved between the fenced operations and
//! the flush that follows them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use gpubatch_core::ContextConfig;

use crate::batch::CommandBatcher;
use crate::cleanup::CleanupQueue;
use crate::command::CommandPool;
use crate::copy::RecordCopy;
use crate::descriptor::{Bindable, DescriptorPool};
use crate::device::Device;
use crate::diagnostics::QueryPool;
use crate::error::{EngineError, Result};
use crate::fence::{FencePool, VulkanFence};
use crate::resource::{PipelineBarrier, VulkanBuffer, VulkanImage};
use crate::shader::ShaderSource;
use crate::utils::{effective_work_groups, UVec3};

const COPY_LABEL: &str = "cmd_copy";

pub struct Context {
    config: ContextConfig,
    device: Arc<dyn Device>,
    // Resource pools
    descriptor_pool: DescriptorPool,
    fences: FencePool,
    // Diagnostics
    op_profiling: AtomicBool,
    querypool: QueryPool,
    // Command buffer submission
    recorder: Mutex<CommandBatcher>,
    // Memory management
    buffers_to_clear: CleanupQueue<VulkanBuffer>,
    images_to_clear: CleanupQueue<VulkanImage>,
}

impl Context {
    pub fn new(device: Arc<dyn Device>, config: ContextConfig) -> Result<Self> {
        config.validate()?;

        let command_pool = CommandPool::new(device.clone(), config.cmd_pool.clone())?;
        let descriptor_pool = DescriptorPool::new(device.clone(), config.descriptor_pool.clone())?;
        let querypool = QueryPool::new(device.clone(), config.query_pool.clone())?;
        let recorder = CommandBatcher::new(device.clone(), command_pool, config.cmd_submit_frequency);

        info!(
            submit_frequency = config.cmd_submit_frequency,
            "created submission context on {}",
            device.name()
        );

        Ok(Self {
            fences: FencePool::new(device.clone()),
            descriptor_pool,
            op_profiling: AtomicBool::new(false),
            querypool,
            recorder: Mutex::new(recorder),
            buffers_to_clear: CleanupQueue::new(),
            images_to_clear: CleanupQueue::new(),
            device,
            config,
        })
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    pub fn fences(&self) -> &FencePool {
        &self.fences
    }

    pub fn querypool(&self) -> &QueryPool {
        &self.querypool
    }

    pub fn enable_op_profiling(&self) {
        self.op_profiling.store(true, Ordering::Release);
    }

    pub fn op_profiling_enabled(&self) -> bool {
        self.op_profiling.load(Ordering::Acquire)
    }

    /// Operations recorded into the open command buffer since the last
    /// submission.
    pub fn submit_count(&self) -> u32 {
        self.recorder.lock().submit_count()
    }

    /// Queue submissions made over the context's lifetime.
    pub fn submissions(&self) -> u64 {
        self.recorder.lock().submissions()
    }

    /// Buffers and images waiting for the next drain.
    pub fn pending_cleanups(&self) -> (usize, usize) {
        (self.buffers_to_clear.len(), self.images_to_clear.len())
    }

    // ── Memory management ───────────────────────────────────

    /// Defer destruction of `buffer` until the next flush.
    pub fn register_buffer_cleanup(&self, buffer: VulkanBuffer) {
        self.buffers_to_clear.register(buffer);
    }

    /// Defer destruction of `image` until the next flush.
    pub fn register_image_cleanup(&self, image: VulkanImage) {
        self.images_to_clear.register(image);
    }

    // ── Diagnostics ─────────────────────────────────────────

    /// Record a reset of the timestamp queries into the shared command
    /// buffer and forget collected results.
    pub fn reset_querypool(&self) -> Result<()> {
        let mut recorder = self.recorder.lock();
        let cmd = recorder.ensure_open()?;
        self.querypool.reset(cmd);
        Ok(())
    }

    // ── Dispatch ────────────────────────────────────────────

    /// Record a copy from `source` to `destination` preceded by `barrier`.
    ///
    /// Only buffer→buffer, image→image, image→buffer and buffer→image pairs
    /// implement [`RecordCopy`]; anything else does not compile.
    pub fn submit_copy<S, D>(
        &self,
        barrier: &PipelineBarrier,
        source: &S,
        destination: &D,
        copy_range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
    ) -> Result<()>
    where
        S: RecordCopy<D>,
    {
        let mut recorder = self.recorder.lock();
        self.record_copy(
            &mut recorder,
            barrier,
            source,
            destination,
            [copy_range, src_offset, dst_offset],
            vk::Fence::null(),
        )?;
        Ok(())
    }

    /// Record a dispatch of `shader`. `arguments[k]` is bound at descriptor
    /// slot `k`; `global_work_group` is a logical output extent. Dividing it
    /// by the shader's output tile size gives the invocations needed, which
    /// are dispatched in groups of `local_work_group_size`.
    pub fn submit_compute_job(
        &self,
        shader: &ShaderSource,
        barrier: &PipelineBarrier,
        global_work_group: UVec3,
        local_work_group_size: UVec3,
        arguments: &[&dyn Bindable],
    ) -> Result<()> {
        let mut recorder = self.recorder.lock();
        self.record_compute_job(
            &mut recorder,
            shader,
            barrier,
            global_work_group,
            local_work_group_size,
            vk::Fence::null(),
            arguments,
        )?;
        Ok(())
    }

    /// Take the recording lock for a sequence that ends in a fenced
    /// submission and a flush.
    pub fn begin_synchronized(&self) -> SyncBatch<'_> {
        SyncBatch {
            context: self,
            recorder: self.recorder.lock(),
            fenced: false,
        }
    }

    /// Submit pending work, wait for the queue to drain, recycle pools and
    /// release every deferred resource.
    pub fn flush(&self) -> Result<()> {
        let mut recorder = self.recorder.lock();
        self.flush_locked(&mut recorder)
    }

    // ── Internals (recording lock held) ─────────────────────

    fn record_copy<S, D>(
        &self,
        recorder: &mut CommandBatcher,
        barrier: &PipelineBarrier,
        source: &S,
        destination: &D,
        [copy_range, src_offset, dst_offset]: [UVec3; 3],
        fence: vk::Fence,
    ) -> Result<bool>
    where
        S: RecordCopy<D>,
    {
        let profiling = self.op_profiling_enabled();
        let cmd = recorder.ensure_open()?;

        let log_idx = if profiling {
            Some(
                self.querypool
                    .shader_profile_begin(cmd, COPY_LABEL, [0, 0, 0], [0, 0, 0])?,
            )
        } else {
            None
        };

        cmd.insert_barrier(barrier);
        source.record_copy(cmd, destination, copy_range, src_offset, dst_offset);

        if let Some(idx) = log_idx {
            self.querypool.shader_profile_end(cmd, idx);
        }

        recorder.record_completed(fence)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_compute_job(
        &self,
        recorder: &mut CommandBatcher,
        shader: &ShaderSource,
        barrier: &PipelineBarrier,
        global_work_group: UVec3,
        local_work_group_size: UVec3,
        fence: vk::Fence,
        arguments: &[&dyn Bindable],
    ) -> Result<bool> {
        if arguments.len() != shader.layout.len() {
            return Err(EngineError::Unsupported(format!(
                "{} takes {} argument(s), got {}",
                shader.kernel_name,
                shader.layout.len(),
                arguments.len()
            )));
        }

        if shader.out_tile_size().contains(&0) || local_work_group_size.contains(&0) {
            return Err(EngineError::Unsupported(format!(
                "{} needs non-zero tile and local sizes, got tile {:?} local {:?}",
                shader.kernel_name,
                shader.out_tile_size(),
                local_work_group_size
            )));
        }

        let profiling = self.op_profiling_enabled();
        let cmd = recorder.ensure_open()?;

        let log_idx = if profiling {
            Some(self.querypool.shader_profile_begin(
                cmd,
                &shader.kernel_name,
                global_work_group,
                local_work_group_size,
            )?)
        } else {
            None
        };

        let pipeline = self.device.compute_pipeline(shader, local_work_group_size)?;
        let mut descriptor_set = self
            .descriptor_pool
            .get_descriptor_set(pipeline.descriptor_set_layout, &shader.layout)?;
        for (idx, argument) in arguments.iter().enumerate() {
            descriptor_set.bind(idx as u32, *argument)?;
        }

        let effective_global = effective_work_groups(global_work_group, shader.out_tile_size());

        cmd.bind_pipeline(&pipeline, local_work_group_size);
        cmd.bind_descriptors(descriptor_set.get_bind_handle());
        cmd.insert_barrier(barrier);
        cmd.dispatch(effective_global);

        if let Some(idx) = log_idx {
            self.querypool.shader_profile_end(cmd, idx);
        }

        recorder.record_completed(fence)
    }

    fn flush_locked(&self, recorder: &mut CommandBatcher) -> Result<()> {
        recorder.submit(vk::Fence::null())?;
        self.device.queue_wait_idle()?;

        recorder.reset_pool()?;
        self.descriptor_pool.flush()?;

        let buffers = self.buffers_to_clear.drain(self.device.as_ref());
        let images = self.images_to_clear.drain(self.device.as_ref());
        debug!(buffers, images, "flushed context");
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let mut recorder = self.recorder.lock();
        if let Err(e) = self.flush_locked(&mut recorder) {
            warn!("flush during context teardown failed: {}", e);
            recorder.discard();
            self.buffers_to_clear.drain(self.device.as_ref());
            self.images_to_clear.drain(self.device.as_ref());
        }
        info!("closed submission context on {}", self.device.name());
    }
}

/// Exclusive recording access for a sequence that ends in a synchronization
/// point.
///
/// While a `SyncBatch` is alive no other thread can record into the
/// context. Operations given a fence are submitted immediately and signal
/// that fence; [`flush`](Self::flush) then retires everything and releases
/// the lock. Dropping a batch that submitted fenced work without flushing it
/// is a programming error and asserts in debug builds.
pub struct SyncBatch<'a> {
    context: &'a Context,
    recorder: MutexGuard<'a, CommandBatcher>,
    fenced: bool,
}

impl<'a> SyncBatch<'a> {
    /// The context this batch records into. Methods that take the recording
    /// lock (`submit_*`, `flush`, `submit_count`, `submissions`) deadlock if
    /// called on it while the batch is alive.
    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn submit_count(&self) -> u32 {
        self.recorder.submit_count()
    }

    /// As [`Context::submit_copy`], optionally signalling `fence`.
    /// Returns whether the operation triggered a submission.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_copy<S, D>(
        &mut self,
        barrier: &PipelineBarrier,
        source: &S,
        destination: &D,
        copy_range: UVec3,
        src_offset: UVec3,
        dst_offset: UVec3,
        fence: Option<&mut VulkanFence>,
    ) -> Result<bool>
    where
        S: RecordCopy<D>,
    {
        let handle = fence.as_deref().map_or(vk::Fence::null(), VulkanFence::handle);
        let submitted = self.context.record_copy(
            &mut self.recorder,
            barrier,
            source,
            destination,
            [copy_range, src_offset, dst_offset],
            handle,
        )?;
        self.mark_submitted(fence, submitted);
        Ok(submitted)
    }

    /// As [`Context::submit_compute_job`], optionally signalling `fence`.
    /// Returns whether the operation triggered a submission.
    pub fn submit_compute_job(
        &mut self,
        shader: &ShaderSource,
        barrier: &PipelineBarrier,
        global_work_group: UVec3,
        local_work_group_size: UVec3,
        fence: Option<&mut VulkanFence>,
        arguments: &[&dyn Bindable],
    ) -> Result<bool> {
        let handle = fence.as_deref().map_or(vk::Fence::null(), VulkanFence::handle);
        let submitted = self.context.record_compute_job(
            &mut self.recorder,
            shader,
            barrier,
            global_work_group,
            local_work_group_size,
            handle,
            arguments,
        )?;
        self.mark_submitted(fence, submitted);
        Ok(submitted)
    }

    /// Flush the context and release the recording lock.
    pub fn flush(mut self) -> Result<()> {
        self.fenced = false;
        self.context.flush_locked(&mut self.recorder)
    }

    /// A fence only counts as in flight once the queue has accepted it.
    fn mark_submitted(&mut self, fence: Option<&mut VulkanFence>, submitted: bool) {
        if let (Some(fence), true) = (fence, submitted) {
            fence.get_submit_handle();
            self.fenced = true;
        }
    }
}

impl Drop for SyncBatch<'_> {
    fn drop(&mut self) {
        debug_assert!(
            !self.fenced || std::thread::panicking(),
            "synchronized batch with fenced work dropped without flush"
        );
    }
}
