//! easyvk compute demo
//!
//! Sends `0..N` from host memory to a device-local buffer and back, with barriers between
//! the copies, then checks what came back. An optional SPIR-V compute shader runs over the
//! device buffer in between.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p easyvk-compute -- --elements 4096
//! cargo run -p easyvk-compute -- --shader double.spv
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod config;

use std::time::Instant;

use anyhow::Context;
use ash::vk;
use easyvk::{
    submit, AllocatedBuffer, BasePipeline, CommandPool, CommandRecorder, ComputePipelineBuilder,
    DescriptorPool, DescriptorPoolSizes, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorWriter, Fence, MemoryLocation, Pipeline,
    PipelineLayout, ShaderModule, SubmitSync,
};
use easyvk_bootstrap::{BootstrapConfig, GpuContext};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{parse_args, print_help, DemoConfig, Invocation};

/// Compute workgroup width assumed for `--shader`.
const WORKGROUP_SIZE: u32 = 64;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args)? {
        Invocation::Help => {
            print_help();
            return Ok(());
        }
        Invocation::Run(config) => config,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let ctx = GpuContext::new(
        &BootstrapConfig::new()
            .app_name("easyvk-compute")
            .validation(config.validation),
    )
    .context("failed to set up a Vulkan device")?;

    run(&ctx, &config)
}

/// Compute pass objects, alive only when `--shader` was given.
struct ComputePass {
    shader: ShaderModule,
    set_layout: DescriptorSetLayout,
    layout: PipelineLayout,
    descriptor_pool: DescriptorPool,
    set: DescriptorSet,
    pipeline: Pipeline,
}

impl ComputePass {
    /// # Safety
    /// The device and `target` must be valid.
    unsafe fn new(
        device: &ash::Device,
        code: &[u8],
        target: &AllocatedBuffer,
    ) -> anyhow::Result<Self> {
        let shader =
            ShaderModule::from_bytes(device, vk::ShaderStageFlags::COMPUTE, code, "main", None)?;
        let set_layout = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)?;
        let push = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(4);
        let layout = PipelineLayout::new(device, &[&set_layout], &[push])?;

        let sizes = DescriptorPoolSizes::new().add(vk::DescriptorType::STORAGE_BUFFER, 1);
        let mut descriptor_pool =
            DescriptorPool::new(device, vk::DescriptorPoolCreateFlags::empty(), 1, &sizes)?;
        let set = descriptor_pool.allocate_set(device, &set_layout)?;
        DescriptorWriter::new(&set)
            .storage_buffer(0, target.handle(), 0, vk::WHOLE_SIZE)
            .update(device)?;

        let mut pipelines = ComputePipelineBuilder::new()
            .add(
                vk::PipelineCreateFlags::empty(),
                &shader,
                &layout,
                BasePipeline::None,
            )
            .build(device, None)?;
        let pipeline = pipelines
            .pop()
            .context("compute pipeline batch came back empty")?;

        Ok(Self {
            shader,
            set_layout,
            layout,
            descriptor_pool,
            set,
            pipeline,
        })
    }

    /// # Safety
    /// Every handle must be valid until the buffer finishes executing.
    unsafe fn record(&self, rec: &mut CommandRecorder<'_>, elements: u32) -> easyvk::Result<()> {
        rec.bind_pipeline(&self.pipeline)?
            .bind_descriptor_set(vk::PipelineBindPoint::COMPUTE, &self.layout, 0, &self.set)?
            .push_constants(
                &self.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&elements),
            )?
            .dispatch(elements.div_ceil(WORKGROUP_SIZE), 1, 1)?;
        Ok(())
    }

    /// # Safety
    /// Nothing recorded with this pass may still be executing.
    unsafe fn destroy(self, device: &ash::Device) {
        self.pipeline.destroy(device);
        self.descriptor_pool.destroy(device);
        self.layout.destroy(device);
        self.set_layout.destroy(device);
        self.shader.destroy(device);
    }
}

fn buffer_barrier(
    buffer: &AllocatedBuffer,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer.handle())
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

fn run(ctx: &GpuContext, config: &DemoConfig) -> anyhow::Result<()> {
    let device = ctx.device();
    let data: Vec<u32> = (0..config.elements).collect();
    let size = u64::from(config.elements) * 4;

    let code = match &config.shader {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let mut allocator = ctx.allocator().lock();
    let host = allocator.create_buffer(
        &data,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    let local = allocator.create_buffer_with_location(
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        "device copy",
    )?;
    let mut readback = allocator.create_buffer_with_location(
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
        "readback",
    )?;

    let compute = match &code {
        Some(code) => Some(unsafe { ComputePass::new(device, code, &local) }?),
        None => None,
    };

    let pool = unsafe {
        CommandPool::new(
            device,
            vk::CommandPoolCreateFlags::TRANSIENT,
            ctx.queue_family(),
        )
    }?;

    let started = Instant::now();
    unsafe {
        let mut cmd = pool.allocate(device, vk::CommandBufferLevel::PRIMARY)?;
        cmd.begin_one_time_submit(device)?;
        {
            let region = [vk::BufferCopy::default().size(size)];
            let mut rec = cmd.recorder(device);
            rec.copy_buffer(host.handle(), local.handle(), &region)?;

            if let Some(pass) = &compute {
                rec.buffer_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    &[buffer_barrier(
                        &local,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                    )],
                )?;
                pass.record(&mut rec, config.elements)?;
                rec.buffer_barrier(
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[buffer_barrier(
                        &local,
                        vk::AccessFlags::SHADER_WRITE,
                        vk::AccessFlags::TRANSFER_READ,
                    )],
                )?;
            } else {
                rec.buffer_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[buffer_barrier(
                        &local,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::TRANSFER_READ,
                    )],
                )?;
            }

            rec.copy_buffer(local.handle(), readback.handle(), &region)?
                .buffer_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::HOST,
                    vk::DependencyFlags::empty(),
                    &[buffer_barrier(
                        &readback,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::HOST_READ,
                    )],
                )?;
        }
        cmd.end(device)?;

        let fence = Fence::create(device, vk::FenceCreateFlags::empty())?;
        submit(
            device,
            ctx.queue(),
            &mut [&mut cmd],
            &SubmitSync::new(),
            Some(&fence),
        )?;
        let signaled = fence.wait(device, u64::MAX);
        fence.destroy(device);
        anyhow::ensure!(signaled?, "submission did not complete");
        cmd.complete();
        pool.free(device, [cmd])?;
    }
    let elapsed = started.elapsed();

    let out: Vec<u32> = allocator.read(&mut readback, 0, config.elements as usize)?;
    match &compute {
        None => {
            let mismatches = out.iter().zip(&data).filter(|(a, b)| a != b).count();
            if mismatches == 0 {
                info!(
                    elements = config.elements,
                    ?elapsed,
                    "round trip matched the host data"
                );
            } else {
                warn!(mismatches, "round trip returned different data");
            }
        }
        Some(_) => {
            let preview: Vec<u32> = out.iter().take(8).copied().collect();
            info!(elements = config.elements, ?elapsed, ?preview, "compute pass finished");
        }
    }

    unsafe {
        if let Some(pass) = compute {
            pass.destroy(device);
        }
        pool.destroy(device);
    }
    allocator.destroy_buffer(host)?;
    allocator.destroy_buffer(local)?;
    allocator.destroy_buffer(readback)?;

    Ok(())
}
