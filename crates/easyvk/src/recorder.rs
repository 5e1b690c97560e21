//! State-checked command recording.

use crate::command::{CommandBuffer, PassScope};
use crate::descriptors::{check_set_compatibility, DescriptorSet, LayoutSignature};
use crate::error::{GpuError, Result};
use crate::pipeline::{check_push_constant_update, Pipeline, PipelineLayout};
use ash::vk;

/// Records commands into a [`CommandBuffer`].
///
/// Every method fails with [`GpuError::StateViolation`] unless the buffer is recording, in
/// which case nothing is recorded. Draws additionally need an open render pass or dynamic
/// rendering instance, while dispatches and transfers need none to be open.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: &'a mut CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub(crate) fn new(device: &'a ash::Device, cmd: &'a mut CommandBuffer) -> Self {
        Self { device, cmd }
    }

    fn recording(&mut self, operation: &'static str) -> Result<vk::CommandBuffer> {
        self.cmd.lifecycle_mut().require_recording(operation)?;
        Ok(self.cmd.handle())
    }

    fn inside_pass(&mut self, operation: &'static str) -> Result<vk::CommandBuffer> {
        self.cmd.lifecycle_mut().require_inside_pass(operation)?;
        Ok(self.cmd.handle())
    }

    fn outside_pass(&mut self, operation: &'static str) -> Result<vk::CommandBuffer> {
        self.cmd.lifecycle_mut().require_outside_pass(operation)?;
        Ok(self.cmd.handle())
    }

    /// Begin a render pass.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn begin_render_pass(
        &mut self,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) -> Result<&mut Self> {
        let cb = self.cmd.handle();
        self.cmd
            .lifecycle_mut()
            .enter_pass(PassScope::RenderPass, "begin_render_pass")?;
        self.device.cmd_begin_render_pass(cb, info, contents);
        Ok(self)
    }

    /// Advance to the next subpass of the current render pass.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn next_subpass(&mut self, contents: vk::SubpassContents) -> Result<&mut Self> {
        let cb = self.cmd.handle();
        self.cmd.lifecycle_mut().require_subpass("next_subpass")?;
        self.device.cmd_next_subpass(cb, contents);
        Ok(self)
    }

    /// End the current render pass.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn end_render_pass(&mut self) -> Result<&mut Self> {
        let cb = self.cmd.handle();
        self.cmd
            .lifecycle_mut()
            .leave_pass(PassScope::RenderPass, "end_render_pass")?;
        self.device.cmd_end_render_pass(cb);
        Ok(self)
    }

    /// Begin a dynamic rendering instance (Vulkan 1.3 `dynamicRendering`), for pipelines
    /// built with [`crate::RenderingFormats`] and no render pass.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer, and the device
    /// must have the `dynamicRendering` feature enabled.
    pub unsafe fn begin_rendering(&mut self, info: &vk::RenderingInfo<'_>) -> Result<&mut Self> {
        let cb = self.cmd.handle();
        self.cmd
            .lifecycle_mut()
            .enter_pass(PassScope::Rendering, "begin_rendering")?;
        self.device.cmd_begin_rendering(cb, info);
        Ok(self)
    }

    /// End the current dynamic rendering instance.
    ///
    /// # Safety
    /// Same as [`CommandRecorder::begin_rendering`].
    pub unsafe fn end_rendering(&mut self) -> Result<&mut Self> {
        let cb = self.cmd.handle();
        self.cmd
            .lifecycle_mut()
            .leave_pass(PassScope::Rendering, "end_rendering")?;
        self.device.cmd_end_rendering(cb);
        Ok(self)
    }

    /// Bind one vertex buffer at binding 0, offset 0.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) -> Result<&mut Self> {
        self.bind_vertex_buffers(0, &[buffer], &[0])
    }

    /// Bind vertex buffers starting at `first_binding`.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) -> Result<&mut Self> {
        let cb = self.recording("bind_vertex_buffers")?;
        if buffers.is_empty() || buffers.len() != offsets.len() {
            return Err(GpuError::InvalidState(format!(
                "{} vertex buffer(s) with {} offset(s)",
                buffers.len(),
                offsets.len()
            )));
        }
        self.device.cmd_bind_vertex_buffers(cb, first_binding, buffers, offsets);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> Result<&mut Self> {
        let cb = self.recording("bind_index_buffer")?;
        self.device.cmd_bind_index_buffer(cb, buffer, offset, index_type);
        Ok(self)
    }

    /// Bind a pipeline at its own bind point.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_pipeline(&mut self, pipeline: &Pipeline) -> Result<&mut Self> {
        self.bind_raw_pipeline(pipeline.bind_point(), pipeline.handle())
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_raw_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> Result<&mut Self> {
        let cb = self.recording("bind_pipeline")?;
        self.device.cmd_bind_pipeline(cb, bind_point, pipeline);
        Ok(self)
    }

    /// Bind descriptor sets at `first_set`, checked against the pipeline layout.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<&mut Self> {
        let cb = self.recording("bind_descriptor_sets")?;
        let signatures: Vec<&LayoutSignature> = sets.iter().map(|s| s.signature()).collect();
        check_set_compatibility(
            layout.set_signatures(),
            first_set,
            &signatures,
            dynamic_offsets.len(),
        )?;

        let handles: Vec<vk::DescriptorSet> = sets.iter().map(|s| s.handle()).collect();
        self.device.cmd_bind_descriptor_sets(
            cb,
            bind_point,
            layout.handle(),
            first_set,
            &handles,
            dynamic_offsets,
        );
        Ok(self)
    }

    /// Bind one descriptor set without dynamic offsets.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        set_index: u32,
        set: &DescriptorSet,
    ) -> Result<&mut Self> {
        self.bind_descriptor_sets(bind_point, layout, set_index, &[set], &[])
    }

    /// Update push constants, checked against the layout's declared ranges.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn push_constants(
        &mut self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> Result<&mut Self> {
        let cb = self.recording("push_constants")?;
        let size = u32::try_from(bytes.len())
            .map_err(|_| GpuError::LayoutMismatch("push constant block too large".to_string()))?;
        check_push_constant_update(layout.push_constant_ranges(), stages, offset, size)?;
        self.device.cmd_push_constants(cb, layout.handle(), stages, offset, bytes);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn set_viewport(
        &mut self,
        first: u32,
        viewports: &[vk::Viewport],
    ) -> Result<&mut Self> {
        let cb = self.recording("set_viewport")?;
        self.device.cmd_set_viewport(cb, first, viewports);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn set_scissor(&mut self, first: u32, scissors: &[vk::Rect2D]) -> Result<&mut Self> {
        let cb = self.recording("set_scissor")?;
        self.device.cmd_set_scissor(cb, first, scissors);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<&mut Self> {
        let cb = self.inside_pass("draw")?;
        self.device.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<&mut Self> {
        let cb = self.inside_pass("draw_indexed")?;
        self.device.cmd_draw_indexed(
            cb,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<&mut Self> {
        let cb = self.outside_pass("dispatch")?;
        self.device.cmd_dispatch(cb, x, y, z);
        Ok(self)
    }

    /// Execute secondary command buffers. Each must be executable.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn execute_commands(
        &mut self,
        secondaries: &mut [&mut CommandBuffer],
    ) -> Result<&mut Self> {
        let cb = self.recording("execute_commands")?;
        for secondary in secondaries.iter_mut() {
            if secondary.level() != vk::CommandBufferLevel::SECONDARY {
                return Err(GpuError::InvalidState(
                    "only secondary command buffers can be executed".to_string(),
                ));
            }
            secondary.lifecycle_mut().check_submittable()?;
        }
        let handles: Vec<vk::CommandBuffer> = secondaries.iter().map(|s| s.handle()).collect();
        self.device.cmd_execute_commands(cb, &handles);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> Result<&mut Self> {
        let cb = self.outside_pass("copy_buffer")?;
        require_regions(regions)?;
        self.device.cmd_copy_buffer(cb, src, dst, regions);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> Result<&mut Self> {
        let cb = self.outside_pass("copy_buffer_to_image")?;
        require_regions(regions)?;
        self.device.cmd_copy_buffer_to_image(cb, src, dst, dst_layout, regions);
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) -> Result<&mut Self> {
        let cb = self.outside_pass("copy_image_to_buffer")?;
        require_regions(regions)?;
        self.device.cmd_copy_image_to_buffer(cb, src, src_layout, dst, regions);
        Ok(self)
    }

    /// Record a pipeline barrier with any mix of global, buffer and image barriers.
    ///
    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) -> Result<&mut Self> {
        let cb = self.recording("pipeline_barrier")?;
        self.device.cmd_pipeline_barrier(
            cb,
            src_stage,
            dst_stage,
            dependency,
            memory_barriers,
            buffer_barriers,
            image_barriers,
        );
        Ok(self)
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        barriers: &[vk::MemoryBarrier<'_>],
    ) -> Result<&mut Self> {
        self.pipeline_barrier(src_stage, dst_stage, dependency, barriers, &[], &[])
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn buffer_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        barriers: &[vk::BufferMemoryBarrier<'_>],
    ) -> Result<&mut Self> {
        self.pipeline_barrier(src_stage, dst_stage, dependency, &[], barriers, &[])
    }

    /// # Safety
    /// Every handle must be valid and outlive the execution of the buffer.
    pub unsafe fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency: vk::DependencyFlags,
        barriers: &[vk::ImageMemoryBarrier<'_>],
    ) -> Result<&mut Self> {
        self.pipeline_barrier(src_stage, dst_stage, dependency, &[], &[], barriers)
    }
}

fn require_regions<T>(regions: &[T]) -> Result<()> {
    if regions.is_empty() {
        Err(GpuError::InvalidState("copy with no regions".to_string()))
    } else {
        Ok(())
    }
}
