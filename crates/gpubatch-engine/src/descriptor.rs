//! Descriptor sets for single dispatches.
//!
//! Sets are drawn from per-layout piles that are refilled a pile at a time
//! and recycled wholesale when the pool is flushed.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::debug;

use gpubatch_core::DescriptorPoolConfig;

use crate::device::{DescriptorResource, DescriptorWrite, Device};
use crate::error::{EngineError, Result};
use crate::resource::{VulkanBuffer, VulkanImage};

/// Anything that can be written into a descriptor binding.
pub trait Bindable {
    fn descriptor(&self) -> DescriptorResource;
}

impl Bindable for VulkanBuffer {
    fn descriptor(&self) -> DescriptorResource {
        DescriptorResource::Buffer {
            buffer: self.handle(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }
}

impl Bindable for VulkanImage {
    fn descriptor(&self) -> DescriptorResource {
        DescriptorResource::Image {
            view: self.view(),
            sampler: self.sampler(),
            layout: self.layout(),
        }
    }
}

fn accepts(descriptor_type: vk::DescriptorType, resource: &DescriptorResource) -> bool {
    match resource {
        DescriptorResource::Buffer { .. } => matches!(
            descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
                | vk::DescriptorType::UNIFORM_BUFFER
                | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
                | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        ),
        DescriptorResource::Image { .. } => matches!(
            descriptor_type,
            vk::DescriptorType::STORAGE_IMAGE
                | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                | vk::DescriptorType::SAMPLED_IMAGE
        ),
    }
}

/// A descriptor set being filled for one dispatch. Bindings are collected
/// and written in one update when the bind handle is taken.
pub struct DescriptorSet {
    device: Arc<dyn Device>,
    handle: vk::DescriptorSet,
    layout: Vec<vk::DescriptorType>,
    bindings: Vec<DescriptorWrite>,
}

impl DescriptorSet {
    fn new(device: Arc<dyn Device>, handle: vk::DescriptorSet, layout: &[vk::DescriptorType]) -> Self {
        Self {
            device,
            handle,
            layout: layout.to_vec(),
            bindings: Vec::with_capacity(layout.len()),
        }
    }

    /// Bind `resource` at slot `idx`. The resource kind must match the
    /// descriptor type the layout declares for that slot.
    pub fn bind(&mut self, idx: u32, resource: &dyn Bindable) -> Result<&mut Self> {
        let descriptor_type = *self.layout.get(idx as usize).ok_or_else(|| {
            EngineError::Unsupported(format!(
                "binding {} out of range for a layout of {} slot(s)",
                idx,
                self.layout.len()
            ))
        })?;
        let resource = resource.descriptor();
        if !accepts(descriptor_type, &resource) {
            return Err(EngineError::Unsupported(format!(
                "cannot bind {:?} to slot {} declared as {:?}",
                resource, idx, descriptor_type
            )));
        }

        let write = DescriptorWrite {
            binding: idx,
            descriptor_type,
            resource,
        };
        match self.bindings.iter_mut().find(|w| w.binding == idx) {
            Some(existing) => *existing = write,
            None => self.bindings.push(write),
        }
        Ok(self)
    }

    pub fn bindings(&self) -> &[DescriptorWrite] {
        &self.bindings
    }

    /// Write every collected binding to the device and return the handle
    /// to bind.
    pub fn get_bind_handle(&mut self) -> vk::DescriptorSet {
        if !self.bindings.is_empty() {
            self.device.update_descriptor_set(self.handle, &self.bindings);
            self.bindings.clear();
        }
        self.handle
    }
}

struct DescriptorSetPile {
    layout: vk::DescriptorSetLayout,
    sets: Vec<vk::DescriptorSet>,
    in_use: usize,
}

impl DescriptorSetPile {
    fn new(layout: vk::DescriptorSetLayout) -> Self {
        Self {
            layout,
            sets: Vec::new(),
            in_use: 0,
        }
    }

    fn get(
        &mut self,
        device: &dyn Device,
        pool: vk::DescriptorPool,
        pile_size: u32,
    ) -> Result<vk::DescriptorSet> {
        if self.in_use >= self.sets.len() {
            let refill = device.allocate_descriptor_sets(pool, self.layout, pile_size)?;
            if refill.is_empty() {
                return Err(EngineError::allocation(
                    "descriptor set",
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY,
                ));
            }
            self.sets.extend(refill);
        }
        let set = self.sets[self.in_use];
        self.in_use += 1;
        Ok(set)
    }
}

pub struct DescriptorPool {
    device: Arc<dyn Device>,
    pool: vk::DescriptorPool,
    config: DescriptorPoolConfig,
    piles: Mutex<HashMap<vk::DescriptorSetLayout, DescriptorSetPile>>,
}

impl DescriptorPool {
    pub fn new(device: Arc<dyn Device>, config: DescriptorPoolConfig) -> Result<Self> {
        let pool = device.create_descriptor_pool(&config)?;
        Ok(Self {
            device,
            pool,
            config,
            piles: Mutex::new(HashMap::new()),
        })
    }

    /// A fresh set for `layout`, typed by the shader's `kernel_layout`.
    pub fn get_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
        kernel_layout: &[vk::DescriptorType],
    ) -> Result<DescriptorSet> {
        let mut piles = self.piles.lock();
        let pile = piles
            .entry(layout)
            .or_insert_with(|| DescriptorSetPile::new(layout));
        let handle = pile.get(self.device.as_ref(), self.pool, self.config.pile_size)?;
        Ok(DescriptorSet::new(self.device.clone(), handle, kernel_layout))
    }

    /// Recycle every set handed out so far.
    pub fn flush(&self) -> Result<()> {
        let mut piles = self.piles.lock();
        if piles.is_empty() {
            return Ok(());
        }
        self.device.reset_descriptor_pool(self.pool)?;
        debug!("recycled descriptor sets from {} pile(s)", piles.len());
        piles.clear();
        Ok(())
    }

    pub fn sets_in_use(&self) -> usize {
        self.piles.lock().values().map(|p| p.in_use).sum()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}
