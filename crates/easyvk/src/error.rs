//! GPU error types.

use crate::command::CommandBufferState;
use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// No memory type on the device has the required property flags.
    #[error("No memory type satisfies {required:?} (type bits {type_bits:#b})")]
    NoCompatibleMemoryType {
        required: vk::MemoryPropertyFlags,
        type_bits: u32,
    },

    /// A fixed-capacity pool has no room left for the request.
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The object was not created with the capability the operation needs.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A command buffer operation was issued in the wrong lifecycle state.
    #[error("`{operation}` is not valid while the command buffer is {state:?}")]
    StateViolation {
        operation: &'static str,
        state: CommandBufferState,
    },

    /// Descriptor sets, writes or push constants disagree with a declared layout.
    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    /// Shader code is not a valid SPIR-V blob.
    #[error("Invalid shader code: {0}")]
    InvalidShaderCode(String),

    /// Pipeline builder state was rejected before reaching the driver.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// The driver failed to create a pipeline.
    #[error("Pipeline creation failed: {0}")]
    PipelineRejected(vk::Result),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// An argument is out of the range the operation can represent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Coarse classification of a [`GpuError`], for callers that branch on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out of device/host memory or out of pool slots.
    CapacityExhausted,
    /// Missing format, feature, extension or object capability.
    Unsupported,
    /// The logical device was lost.
    DeviceLost,
    /// Lifecycle precondition violated.
    StateViolation,
    /// Resource binding does not match its declared layout.
    LayoutMismatch,
    /// Memory could not be allocated as requested.
    Allocation,
    /// Malformed input (shader code, builder state, ranges).
    InvalidArgument,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Classify a raw Vulkan result code.
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_FRAGMENTATION
            | vk::Result::ERROR_TOO_MANY_OBJECTS => Self::CapacityExhausted,
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED
            | vk::Result::ERROR_FEATURE_NOT_PRESENT
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_LAYER_NOT_PRESENT
            | vk::Result::ERROR_INCOMPATIBLE_DRIVER => Self::Unsupported,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            _ => Self::Other,
        }
    }
}

impl GpuError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vulkan(result) | Self::PipelineRejected(result) => ErrorKind::from_vk(*result),
            Self::NoSuitableDevice => ErrorKind::Unsupported,
            Self::AllocationFailed(_) | Self::NoCompatibleMemoryType { .. } => {
                ErrorKind::Allocation
            }
            Self::CapacityExhausted(_) => ErrorKind::CapacityExhausted,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::StateViolation { .. } => ErrorKind::StateViolation,
            Self::LayoutMismatch(_) => ErrorKind::LayoutMismatch,
            Self::InvalidShaderCode(_) | Self::PipelineCreation(_) | Self::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            Self::SwapchainCreation(_) | Self::InvalidState(_) => ErrorKind::Other,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_codes_are_classified() {
        assert_eq!(
            GpuError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY).kind(),
            ErrorKind::CapacityExhausted
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_FORMAT_NOT_SUPPORTED).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST).kind(),
            ErrorKind::DeviceLost
        );
        assert_eq!(GpuError::from(vk::Result::TIMEOUT).kind(), ErrorKind::Other);
    }

    #[test]
    fn driver_pipeline_failures_keep_their_class() {
        assert_eq!(
            GpuError::PipelineRejected(vk::Result::ERROR_DEVICE_LOST).kind(),
            ErrorKind::DeviceLost
        );
        assert_eq!(
            GpuError::PipelineRejected(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).kind(),
            ErrorKind::CapacityExhausted
        );
        assert_eq!(
            GpuError::PipelineCreation("no vertex stage".to_string()).kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn wrapper_errors_are_classified() {
        let err = GpuError::StateViolation {
            operation: "draw",
            state: CommandBufferState::Initial,
        };
        assert_eq!(err.kind(), ErrorKind::StateViolation);
        assert!(err.to_string().contains("draw"));

        let err = GpuError::NoCompatibleMemoryType {
            required: vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
            type_bits: 0b11,
        };
        assert_eq!(err.kind(), ErrorKind::Allocation);
    }
}
