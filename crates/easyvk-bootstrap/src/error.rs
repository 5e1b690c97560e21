//! Bootstrap error types.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The Vulkan loader could not be found or opened.
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error(transparent)]
    Gpu(#[from] easyvk::GpuError),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),
}

impl BootstrapError {
    /// True when the failure means there is no usable Vulkan implementation on this machine.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Loading(_)
                | Self::Vulkan(vk::Result::ERROR_INCOMPATIBLE_DRIVER)
                | Self::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
                | Self::Gpu(easyvk::GpuError::NoSuitableDevice)
        )
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_driver_counts_as_unavailable() {
        assert!(BootstrapError::Vulkan(vk::Result::ERROR_INCOMPATIBLE_DRIVER).is_unavailable());
        assert!(BootstrapError::Gpu(easyvk::GpuError::NoSuitableDevice).is_unavailable());
        assert!(!BootstrapError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_unavailable());
        assert!(!BootstrapError::InvalidName("a\0b".to_string()).is_unavailable());
    }
}
