use ash::vk;

use gpubatch_core::CoreError;

/// Errors surfaced by the submission engine. Every variant except
/// `Unsupported` means the context's GPU state should be considered suspect;
/// nothing in the engine retries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to allocate {what}: {result:?}")]
    Allocation {
        what: &'static str,
        result: vk::Result,
    },

    #[error("device out of memory during {0}")]
    OutOfMemory(&'static str),

    #[error("device lost during {0}")]
    DeviceLost(&'static str),

    #[error("queue submission failed: {0:?}")]
    Submission(vk::Result),

    #[error("{op} failed: {result:?}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("Vulkan loader unavailable: {0}")]
    Loader(String),

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl EngineError {
    /// Classify a raw Vulkan error returned by `op`.
    pub fn from_vk(op: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                EngineError::OutOfMemory(op)
            }
            vk::Result::ERROR_DEVICE_LOST => EngineError::DeviceLost(op),
            _ => EngineError::Vulkan { op, result },
        }
    }

    /// Classify a raw Vulkan error from an allocation of `what`.
    pub fn allocation(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => EngineError::DeviceLost(what),
            _ => EngineError::Allocation { what, result },
        }
    }

    /// True for failures after which the device can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Unsupported(_) | EngineError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_errors_are_classified() {
        let err = EngineError::from_vk("vkQueueSubmit", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(err, EngineError::OutOfMemory("vkQueueSubmit")));
        assert!(err.is_fatal());
    }

    #[test]
    fn device_loss_wins_over_allocation() {
        let err = EngineError::allocation("descriptor set", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, EngineError::DeviceLost(_)));
    }

    #[test]
    fn unsupported_is_not_fatal() {
        assert!(!EngineError::Unsupported("x".into()).is_fatal());
    }
}
