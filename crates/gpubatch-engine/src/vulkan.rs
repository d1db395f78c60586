//! [`Device`] backed by a real Vulkan adapter through `ash`.

use std::ffi::CStr;

use ash::vk;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use gpubatch_core::DescriptorPoolConfig;

use crate::device::{ComputePipeline, DescriptorResource, DescriptorWrite, Device};
use crate::error::{EngineError, Result};
use crate::resource::{BufferKind, ImageDesc, PipelineBarrier, VulkanBuffer, VulkanImage};
use crate::shader::ShaderSource;
use crate::utils::{extent3d, UVec3};

fn vk_err(op: &'static str) -> impl FnOnce(vk::Result) -> EngineError {
    move |result| EngineError::from_vk(op, result)
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

pub struct VulkanDevice {
    // Kept alive for the lifetime of the instance.
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    name: String,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    timestamp_period: f32,
    pipelines: DashMap<(String, UVec3), ComputePipeline>,
}

impl VulkanDevice {
    /// Open the `adapter_index`-th adapter that exposes a compute queue.
    pub fn new(adapter_index: usize) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| EngineError::Loader(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"gpubatch")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"gpubatch")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 1, 0));
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(vk_err("vkCreateInstance"))?;

        match Self::open(&instance, adapter_index) {
            Ok((device, physical, queue_family)) => {
                let props = unsafe { instance.get_physical_device_properties(physical) };
                let memory_props =
                    unsafe { instance.get_physical_device_memory_properties(physical) };
                let name = unsafe {
                    CStr::from_ptr(props.device_name.as_ptr())
                        .to_string_lossy()
                        .into_owned()
                };
                let queue = unsafe { device.get_device_queue(queue_family, 0) };
                info!(adapter = adapter_index, queue_family, "opened Vulkan device {}", name);

                Ok(Self {
                    _entry: entry,
                    instance,
                    device,
                    queue: Mutex::new(queue),
                    queue_family,
                    name,
                    memory_props,
                    timestamp_period: props.limits.timestamp_period,
                    pipelines: DashMap::new(),
                })
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn open(
        instance: &ash::Instance,
        adapter_index: usize,
    ) -> Result<(ash::Device, vk::PhysicalDevice, u32)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(vk_err("vkEnumeratePhysicalDevices"))?;

        let (physical, queue_family) = physical_devices
            .iter()
            .filter_map(|&pd| {
                let families =
                    unsafe { instance.get_physical_device_queue_family_properties(pd) };
                families
                    .iter()
                    .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
                    .map(|family| (pd, family as u32))
            })
            .nth(adapter_index)
            .ok_or_else(|| {
                EngineError::Unsupported(format!(
                    "no compute-capable Vulkan adapter at index {adapter_index}"
                ))
            })?;

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let device_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
        let device = unsafe { instance.create_device(physical, &device_info, None) }
            .map_err(vk_err("vkCreateDevice"))?;
        Ok((device, physical, queue_family))
    }

    fn allocate_memory(
        &self,
        reqs: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let type_index = find_memory_type(&self.memory_props, reqs.memory_type_bits, flags)
            .ok_or_else(|| {
                EngineError::allocation("device memory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            })?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(reqs.size)
            .memory_type_index(type_index);
        unsafe { self.device.allocate_memory(&alloc_info, None) }
            .map_err(|e| EngineError::allocation("device memory", e))
    }

    fn create_pipeline(
        &self,
        shader: &ShaderSource,
        local_work_group: UVec3,
    ) -> Result<ComputePipeline> {
        let dev = &self.device;

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = shader
            .layout
            .iter()
            .enumerate()
            .map(|(slot, &ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot as u32)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let descriptor_set_layout = unsafe { dev.create_descriptor_set_layout(&set_layout_info, None) }
            .map_err(vk_err("vkCreateDescriptorSetLayout"))?;

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&descriptor_set_layout));
        let layout = match unsafe { dev.create_pipeline_layout(&layout_info, None) } {
            Ok(l) => l,
            Err(e) => {
                unsafe { dev.destroy_descriptor_set_layout(descriptor_set_layout, None) };
                return Err(EngineError::from_vk("vkCreatePipelineLayout", e));
            }
        };

        let destroy_layouts = || unsafe {
            dev.destroy_pipeline_layout(layout, None);
            dev.destroy_descriptor_set_layout(descriptor_set_layout, None);
        };

        let module_info = vk::ShaderModuleCreateInfo::default().code(&shader.spirv);
        let module = match unsafe { dev.create_shader_module(&module_info, None) } {
            Ok(m) => m,
            Err(e) => {
                destroy_layouts();
                return Err(EngineError::from_vk("vkCreateShaderModule", e));
            }
        };

        // Local work-group size goes in specialization constants 0..=2.
        let map_entries: Vec<vk::SpecializationMapEntry> = (0..3u32)
            .map(|i| vk::SpecializationMapEntry {
                constant_id: i,
                offset: i * 4,
                size: 4,
            })
            .collect();
        let spec_info = vk::SpecializationInfo::default()
            .map_entries(&map_entries)
            .data(bytemuck::cast_slice::<u32, u8>(&local_work_group));
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main")
            .specialization_info(&spec_info);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let created = unsafe {
            dev.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };
        unsafe { dev.destroy_shader_module(module, None) };

        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                destroy_layouts();
                return Err(EngineError::from_vk("vkCreateComputePipelines", e));
            }
        };
        let Some(pipeline) = pipeline else {
            destroy_layouts();
            return Err(EngineError::from_vk(
                "vkCreateComputePipelines",
                vk::Result::ERROR_UNKNOWN,
            ));
        };

        debug!(
            kernel = %shader.kernel_name,
            local = ?local_work_group,
            "created compute pipeline"
        );
        Ok(ComputePipeline {
            pipeline,
            layout,
            descriptor_set_layout,
        })
    }
}

impl Device for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    // ── Command pools ───────────────────────────────────────

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default().queue_family_index(self.queue_family);
        unsafe { self.device.create_command_pool(&info, None) }
            .map_err(|e| EngineError::allocation("command pool", e))
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| EngineError::allocation("command buffer", e))
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(vk_err("vkResetCommandPool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &info) }
            .map_err(vk_err("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd) }.map_err(vk_err("vkEndCommandBuffer"))
    }

    // ── Recording ───────────────────────────────────────────

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, barrier: &PipelineBarrier) {
        let buffers: Vec<vk::BufferMemoryBarrier> = barrier
            .buffers
            .iter()
            .map(|b| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(b.src_access)
                    .dst_access_mask(b.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(b.buffer)
                    .offset(b.offset)
                    .size(b.size)
            })
            .collect();
        let images: Vec<vk::ImageMemoryBarrier> = barrier
            .images
            .iter()
            .map(|i| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(i.src_access)
                    .dst_access_mask(i.dst_access)
                    .old_layout(i.old_layout)
                    .new_layout(i.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(i.image)
                    .subresource_range(color_range())
            })
            .collect();

        // Stage masks must be non-zero.
        let src_stage = if barrier.src_stage.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            barrier.src_stage
        };
        let dst_stage = if barrier.dst_stage.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            barrier.dst_stage
        };

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffers,
                &images,
            )
        };
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) {
        unsafe {
            self.device
                .cmd_copy_image(cmd, src, src_layout, dst, dst_layout, &[region])
        };
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(cmd, src, src_layout, dst, &[region])
        };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, &[region])
        };
    }

    fn cmd_bind_compute_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline)
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                &[],
            )
        };
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: UVec3) {
        unsafe { self.device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]) };
    }

    fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        unsafe { self.device.cmd_reset_query_pool(cmd, pool, first, count) };
    }

    fn cmd_write_timestamp(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        unsafe {
            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                pool,
                query,
            )
        };
    }

    // ── Descriptors ─────────────────────────────────────────

    fn create_descriptor_pool(
        &self,
        config: &DescriptorPoolConfig,
    ) -> Result<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, config.uniform_buffer_count),
            (vk::DescriptorType::STORAGE_BUFFER, config.storage_buffer_count),
            (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                config.combined_sampler_count,
            ),
            (vk::DescriptorType::STORAGE_IMAGE, config.storage_image_count),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();

        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(config.max_sets)
            .pool_sizes(&sizes);
        unsafe { self.device.create_descriptor_pool(&info, None) }
            .map_err(|e| EngineError::allocation("descriptor pool", e))
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
            .map_err(|e| EngineError::allocation("descriptor set", e))
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(vk_err("vkResetDescriptorPool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        // Info structs must outlive the writes that point at them.
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                },
                DescriptorResource::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|w| match w.resource {
                DescriptorResource::Image {
                    view,
                    sampler,
                    layout,
                } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                DescriptorResource::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .descriptor_type(w.descriptor_type);
                match w.resource {
                    DescriptorResource::Buffer { .. } => {
                        write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    DescriptorResource::Image { .. } => {
                        write.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // ── Fences ──────────────────────────────────────────────

    fn create_fence(&self) -> Result<vk::Fence> {
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(|e| EngineError::allocation("fence", e))
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(vk_err("vkResetFences"))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
            .map_err(vk_err("vkWaitForFences"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    // ── Queue ───────────────────────────────────────────────

    fn queue_submit(&self, cmd: vk::CommandBuffer, fence: vk::Fence) -> Result<()> {
        let cmds = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit], fence) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_HOST_MEMORY => EngineError::from_vk("vkQueueSubmit", e),
            _ => EngineError::Submission(e),
        })
    }

    fn queue_wait_idle(&self) -> Result<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }.map_err(vk_err("vkQueueWaitIdle"))
    }

    // ── Memory ──────────────────────────────────────────────

    fn create_buffer(&self, size: vk::DeviceSize, kind: BufferKind) -> Result<VulkanBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { self.device.create_buffer(&info, None) }
            .map_err(|e| EngineError::allocation("buffer", e))?;

        let reqs = unsafe { self.device.get_buffer_memory_requirements(handle) };
        let flags = if kind.host_visible() {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let memory = match self.allocate_memory(reqs, flags) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_buffer_memory(handle, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(handle, None);
                self.device.free_memory(memory, None);
            }
            return Err(EngineError::from_vk("vkBindBufferMemory", e));
        }
        Ok(VulkanBuffer::new(handle, memory, size, kind))
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, bytes: &[u8]) -> Result<()> {
        if !buffer.kind().host_visible() || bytes.len() as u64 > buffer.size() {
            return Err(EngineError::from_vk(
                "vkMapMemory",
                vk::Result::ERROR_MEMORY_MAP_FAILED,
            ));
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(
                    buffer.memory(),
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(vk_err("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(buffer.memory());
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.handle(), None);
            self.device.free_memory(buffer.memory(), None);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<VulkanImage> {
        let info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(extent3d(desc.extent))
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let handle = unsafe { self.device.create_image(&info, None) }
            .map_err(|e| EngineError::allocation("image", e))?;

        let reqs = unsafe { self.device.get_image_memory_requirements(handle) };
        let memory = match self.allocate_memory(reqs, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.device.destroy_image(handle, None) };
                return Err(e);
            }
        };
        let release = || unsafe {
            self.device.destroy_image(handle, None);
            self.device.free_memory(memory, None);
        };
        if let Err(e) = unsafe { self.device.bind_image_memory(handle, memory, 0) } {
            release();
            return Err(EngineError::from_vk("vkBindImageMemory", e));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(color_range());
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(v) => v,
            Err(e) => {
                release();
                return Err(EngineError::allocation("image view", e));
            }
        };

        let sampler = if desc.usage.contains(vk::ImageUsageFlags::SAMPLED) {
            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
            match unsafe { self.device.create_sampler(&sampler_info, None) } {
                Ok(s) => s,
                Err(e) => {
                    unsafe { self.device.destroy_image_view(view, None) };
                    release();
                    return Err(EngineError::allocation("sampler", e));
                }
            }
        } else {
            vk::Sampler::null()
        };

        Ok(VulkanImage::new(
            handle,
            memory,
            view,
            sampler,
            desc.format,
            desc.extent,
        ))
    }

    fn destroy_image(&self, image: VulkanImage) {
        unsafe {
            if image.sampler() != vk::Sampler::null() {
                self.device.destroy_sampler(image.sampler(), None);
            }
            self.device.destroy_image_view(image.view(), None);
            self.device.destroy_image(image.handle(), None);
            self.device.free_memory(image.memory(), None);
        }
    }

    // ── Pipelines ───────────────────────────────────────────

    fn compute_pipeline(
        &self,
        shader: &ShaderSource,
        local_work_group: UVec3,
    ) -> Result<ComputePipeline> {
        // Holding the entry keeps concurrent callers from building the same
        // pipeline twice.
        match self
            .pipelines
            .entry((shader.kernel_name.clone(), local_work_group))
        {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(v) => {
                let pipeline = self.create_pipeline(shader, local_work_group)?;
                v.insert(pipeline);
                Ok(pipeline)
            }
        }
    }

    // ── Diagnostics ─────────────────────────────────────────

    fn create_query_pool(&self, count: u32) -> Result<vk::QueryPool> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        unsafe { self.device.create_query_pool(&info, None) }
            .map_err(|e| EngineError::allocation("query pool", e))
    }

    fn query_timestamps(&self, pool: vk::QueryPool, first: u32, out: &mut [u64]) -> Result<()> {
        unsafe {
            self.device.get_query_pool_results(
                pool,
                first,
                out,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(vk_err("vkGetQueryPoolResults"))
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.destroy_query_pool(pool, None) };
    }

    fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for entry in self.pipelines.iter() {
                let p = entry.value();
                self.device.destroy_pipeline(p.pipeline, None);
                self.device.destroy_pipeline_layout(p.layout, None);
                self.device
                    .destroy_descriptor_set_layout(p.descriptor_set_layout, None);
            }
            self.pipelines.clear();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        debug!("destroyed Vulkan device {}", self.name);
    }
}
