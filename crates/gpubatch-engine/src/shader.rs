use ash::vk;

use crate::utils::UVec3;

/// A compiled compute shader as handed over by the shader layer.
///
/// `kernel_name` is the shader's identity: pipeline caches are keyed by it,
/// and profiling brackets are labelled with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub kernel_name: String,
    pub spirv: Vec<u32>,
    /// Descriptor type of each binding slot, in slot order.
    pub layout: Vec<vk::DescriptorType>,
    /// Output elements produced by one invocation along each axis.
    out_tile_size: UVec3,
}

impl ShaderSource {
    pub fn new(
        kernel_name: impl Into<String>,
        spirv: Vec<u32>,
        layout: Vec<vk::DescriptorType>,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            spirv,
            layout,
            out_tile_size: [1, 1, 1],
        }
    }

    /// Set the output tile size. A zero axis is rejected when the shader is
    /// dispatched.
    pub fn with_tile_size(mut self, out_tile_size: UVec3) -> Self {
        self.out_tile_size = out_tile_size;
        self
    }

    pub fn out_tile_size(&self) -> UVec3 {
        self.out_tile_size
    }
}
