//! Vulkan convenience layer.
//!
//! This crate provides:
//! - Fences and semaphores
//! - Command pools and command buffers with tracked lifecycle state
//! - A checked command recorder
//! - Descriptor pools, set layouts and validated descriptor writes
//! - Graphics and compute pipeline builders
//! - Buffer allocation and host/device transfers via gpu-allocator
//! - Swapchain handling

pub mod command;
pub mod descriptors;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod recorder;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use command::{
    execute_one_time, queue_wait_idle, submit, CommandBuffer, CommandBufferState, CommandPool,
    SubmitSync,
};
pub use descriptors::{
    DescriptorBinding, DescriptorPool, DescriptorPoolSizes, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorWriter, LayoutSignature, PoolCapacity,
};
pub use error::{ErrorKind, GpuError, Result};
pub use memory::{AllocatedBuffer, AllocatorConfig, BufferAllocator};
pub use pipeline::{
    BasePipeline, ComputePipelineBuilder, DepthStencilState, GraphicsPipelineBuilder,
    MultisampleState, Pipeline, PipelineCache, PipelineLayout, RasterizationState,
    RenderingFormats, ViewportState,
};
pub use recorder::CommandRecorder;
pub use shader::{ShaderModule, Specialization};
pub use swapchain::{Swapchain, SwapchainDesc};
pub use sync::{wait_for_fences, Fence, Semaphore};

// Re-exported so callers can name `MemoryLocation` without a direct dependency.
pub use gpu_allocator::MemoryLocation;
