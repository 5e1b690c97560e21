//! Shared fixtures for device-backed tests.

#![allow(dead_code)]

use ash::vk;
use easyvk::{CommandPool, ShaderModule};
use easyvk_bootstrap::{BootstrapConfig, GpuContext};
use tracing_subscriber::EnvFilter;

/// Build a context, or `None` when this machine has no usable Vulkan implementation.
pub fn context() -> Option<GpuContext> {
    context_with(&BootstrapConfig::new().app_name("easyvk-tests"))
}

/// Like [`context`], with explicit settings. `None` also covers devices below the requested
/// API version.
pub fn context_with(config: &BootstrapConfig) -> Option<GpuContext> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();

    match GpuContext::new(config) {
        Ok(context) => Some(context),
        Err(e) if e.is_unavailable() => {
            tracing::warn!("skipping device test: {e}");
            None
        }
        Err(e) => panic!("failed to bootstrap a device: {e}"),
    }
}

pub fn resettable_pool(ctx: &GpuContext) -> CommandPool {
    unsafe {
        CommandPool::new(
            ctx.device(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ctx.queue_family(),
        )
    }
    .unwrap()
}

const MAIN: u32 = 0x6E69_616D;

// Hand-assembled SPIR-V 1.0 modules with an empty `main`.
// Ids: 1 = main, 2 = void, 3 = fn() -> void, 4 = label.
#[rustfmt::skip]
const PREAMBLE: [u32; 10] = [
    0x0723_0203, 0x0001_0000, 0, 5, 0,
    0x0002_0011, 1, // OpCapability Shader
    0x0003_000E, 0, 1, // OpMemoryModel Logical GLSL450
];
#[rustfmt::skip]
const BODY: [u32; 14] = [
    0x0002_0013, 2, // OpTypeVoid
    0x0003_0021, 3, 2, // OpTypeFunction
    0x0005_0036, 2, 1, 0, 3, // OpFunction
    0x0002_00F8, 4, // OpLabel
    0x0001_00FD, // OpReturn
    0x0001_0038, // OpFunctionEnd
];

fn assemble(execution_model: u32, execution_mode: &[u32]) -> Vec<u32> {
    let mut words = PREAMBLE.to_vec();
    words.extend_from_slice(&[0x0005_000F, execution_model, 1, MAIN, 0]);
    words.extend_from_slice(execution_mode);
    words.extend_from_slice(&BODY);
    words
}

pub fn compute_spirv() -> Vec<u32> {
    // OpExecutionMode %main LocalSize 1 1 1
    assemble(5, &[0x0006_0010, 1, 17, 1, 1, 1])
}

pub fn vertex_spirv() -> Vec<u32> {
    assemble(0, &[])
}

pub fn fragment_spirv() -> Vec<u32> {
    // OpExecutionMode %main OriginUpperLeft
    assemble(4, &[0x0003_0010, 1, 7])
}

pub fn shader(ctx: &GpuContext, stage: vk::ShaderStageFlags, words: &[u32]) -> ShaderModule {
    unsafe { ShaderModule::from_words(ctx.device(), stage, words, "main", None) }.unwrap()
}
