//! Process-wide context on the default adapter.
//!
//! The context is created on first use. When no Vulkan loader or adapter is
//! present the failure is logged once and every later call reports the
//! runtime as unavailable.

use std::sync::{Arc, OnceLock};

use tracing::warn;

use gpubatch_core::{default_config_path, ContextConfig};

use crate::context::Context;
use crate::error::Result;
use crate::vulkan::VulkanDevice;

static RUNTIME: OnceLock<Option<Context>> = OnceLock::new();

fn init() -> Result<Context> {
    let config = ContextConfig::load_or_default(&default_config_path());
    let device = VulkanDevice::new(0)?;
    Context::new(Arc::new(device), config)
}

/// The shared context, or `None` when no usable adapter exists.
pub fn context() -> Option<&'static Context> {
    RUNTIME
        .get_or_init(|| match init() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Vulkan runtime unavailable: {}", e);
                None
            }
        })
        .as_ref()
}

pub fn available() -> bool {
    context().is_some()
}
