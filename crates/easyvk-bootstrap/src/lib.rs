//! Headless Vulkan bootstrap for easyvk.
//!
//! Creates the instance, picks a physical device, creates a logical device with one
//! graphics/compute queue and sets up the buffer allocator. No surface is involved.

pub mod context;
pub mod error;
pub mod instance;

pub use context::{BootstrapConfig, GpuContext};
pub use error::{BootstrapError, Result};
