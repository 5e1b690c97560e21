//! Pipeline creation and management.

use crate::descriptors::{DescriptorSetLayout, LayoutSignature};
use crate::error::{GpuError, Result};
use crate::shader::{ShaderModule, Specialization};
use ash::vk;

/// Check a list of push-constant ranges: each must be non-empty and 4-byte aligned, name at
/// least one stage, and not overlap another range that shares a stage.
pub fn validate_push_constant_ranges(ranges: &[vk::PushConstantRange]) -> Result<()> {
    for (i, range) in ranges.iter().enumerate() {
        if range.size == 0 || range.offset % 4 != 0 || range.size % 4 != 0 {
            return Err(GpuError::LayoutMismatch(format!(
                "push constant range {}+{} must be non-empty and 4-byte aligned",
                range.offset, range.size
            )));
        }
        if range.stage_flags.is_empty() {
            return Err(GpuError::LayoutMismatch(format!(
                "push constant range {i} has no shader stages"
            )));
        }
        for other in &ranges[..i] {
            let shared = !(range.stage_flags & other.stage_flags).is_empty();
            let overlaps = range.offset < other.offset + other.size
                && other.offset < range.offset + range.size;
            if shared && overlaps {
                return Err(GpuError::LayoutMismatch(format!(
                    "push constant ranges {}+{} and {}+{} overlap for {:?}",
                    other.offset,
                    other.size,
                    range.offset,
                    range.size,
                    range.stage_flags & other.stage_flags
                )));
            }
        }
    }
    Ok(())
}

/// Check a push-constant update against the ranges declared by a layout.
///
/// Every byte must be covered for every stage in `stages`, and every range touching the
/// update must have all of its stages named in `stages`.
pub fn check_push_constant_update(
    ranges: &[vk::PushConstantRange],
    stages: vk::ShaderStageFlags,
    offset: u32,
    size: u32,
) -> Result<()> {
    if size == 0 || offset % 4 != 0 || size % 4 != 0 || stages.is_empty() {
        return Err(GpuError::LayoutMismatch(format!(
            "push constant update {offset}+{size} for {stages:?} is malformed"
        )));
    }
    let end = u64::from(offset) + u64::from(size);

    for bit in 0..u32::BITS {
        let stage = vk::ShaderStageFlags::from_raw(1u32 << bit);
        if !stages.contains(stage) {
            continue;
        }
        let mut covering: Vec<&vk::PushConstantRange> = ranges
            .iter()
            .filter(|r| r.stage_flags.contains(stage))
            .collect();
        covering.sort_by_key(|r| r.offset);

        let mut covered_to = u64::from(offset);
        for range in covering {
            let start = u64::from(range.offset);
            if start > covered_to {
                break;
            }
            covered_to = covered_to.max(start + u64::from(range.size));
        }
        if covered_to < end {
            return Err(GpuError::LayoutMismatch(format!(
                "push constant bytes {offset}..{end} are not declared for {stage:?}"
            )));
        }
    }

    for range in ranges {
        let overlaps = u64::from(range.offset) < end
            && u64::from(offset) < u64::from(range.offset) + u64::from(range.size);
        if overlaps && !stages.contains(range.stage_flags) {
            return Err(GpuError::LayoutMismatch(format!(
                "push constant update must name {:?} for the range at {}",
                range.stage_flags, range.offset
            )));
        }
    }
    Ok(())
}

/// Pipeline layout: ordered set layouts (order = set index) plus push-constant ranges.
///
/// The layout keeps only the set layouts' binding signatures; the caller keeps the
/// [`DescriptorSetLayout`]s alive and destroys them.
#[derive(Debug)]
pub struct PipelineLayout {
    layout: vk::PipelineLayout,
    set_signatures: Vec<LayoutSignature>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// Create a pipeline layout.
    ///
    /// # Safety
    /// The device and set layouts must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        validate_push_constant_ranges(push_constant_ranges)?;

        let handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|l| l.handle()).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&handles)
            .push_constant_ranges(push_constant_ranges);

        let layout = device.create_pipeline_layout(&layout_info, None)?;

        Ok(Self {
            layout,
            set_signatures: set_layouts.iter().map(|l| l.signature().clone()).collect(),
            push_constant_ranges: push_constant_ranges.to_vec(),
        })
    }

    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Binding signatures of the set layouts, indexed by set number.
    pub fn set_signatures(&self) -> &[LayoutSignature] {
        &self.set_signatures
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Destroy the layout.
    ///
    /// # Safety
    /// The device must be valid and no pipeline creation may be using the layout.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.layout, None);
    }
}

/// Driver pipeline cache, serializable to a byte blob.
#[derive(Debug)]
pub struct PipelineCache {
    cache: vk::PipelineCache,
}

impl PipelineCache {
    /// Create a cache, optionally seeded with data from [`PipelineCache::data`].
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, initial_data: &[u8]) -> Result<Self> {
        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        let cache = device.create_pipeline_cache(&create_info, None)?;
        Ok(Self { cache })
    }

    /// Get the raw cache handle.
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Serialize the cache contents.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn data(&self, device: &ash::Device) -> Result<Vec<u8>> {
        Ok(device.get_pipeline_cache_data(self.cache)?)
    }

    /// Destroy the cache.
    ///
    /// # Safety
    /// The device must be valid and no pipeline creation may be using the cache.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_pipeline_cache(self.cache, None);
    }
}

/// A compiled graphics or compute pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    flags: vk::PipelineCreateFlags,
}

impl Pipeline {
    /// Get the raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn flags(&self) -> vk::PipelineCreateFlags {
        self.flags
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        tracing::debug!(pipeline = ?self.pipeline, "destroyed pipeline");
    }
}

/// Viewport and scissor configuration.
#[derive(Debug, Clone)]
pub enum ViewportState {
    /// Baked into the pipeline. An array may be empty only if the matching dynamic state is
    /// declared, in which case its count follows the other array.
    Static {
        viewports: Vec<vk::Viewport>,
        scissors: Vec<vk::Rect2D>,
    },
    /// Set at record time; `VIEWPORT` and `SCISSOR` dynamic states are added automatically.
    Dynamic {
        viewport_count: u32,
        scissor_count: u32,
    },
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::Dynamic {
            viewport_count: 1,
            scissor_count: 1,
        }
    }
}

/// Constant depth bias parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

/// Rasterization configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: Option<DepthBias>,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            depth_clamp: false,
            rasterizer_discard: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: None,
            line_width: 1.0,
        }
    }
}

/// Multisample configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MultisampleState {
    pub samples: vk::SampleCountFlags,
    /// Minimum sample shading fraction; `None` disables sample shading.
    pub sample_shading: Option<f32>,
    /// One word per 32 samples, or empty for all samples.
    pub sample_mask: Vec<u32>,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            samples: vk::SampleCountFlags::TYPE_1,
            sample_shading: None,
            sample_mask: Vec::new(),
            alpha_to_coverage: false,
            alpha_to_one: false,
        }
    }
}

/// Depth and stencil configuration.
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
    /// `(min, max)` depth bounds; `None` disables the bounds test.
    pub depth_bounds: Option<(f32, f32)>,
    /// `(front, back)` stencil operations; `None` disables the stencil test.
    pub stencil: Option<(vk::StencilOpState, vk::StencilOpState)>,
}

impl DepthStencilState {
    /// Depth only, no bounds test and no stencil.
    pub fn depth_only(depth_test: bool, depth_write: bool, compare_op: vk::CompareOp) -> Self {
        Self {
            depth_test,
            depth_write,
            compare_op,
            depth_bounds: None,
            stencil: None,
        }
    }

    pub fn disabled() -> Self {
        Self::depth_only(false, false, vk::CompareOp::ALWAYS)
    }
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self::depth_only(true, true, vk::CompareOp::LESS)
    }
}

/// Attachment formats for dynamic rendering (no render pass object).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderingFormats {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub stencil_format: vk::Format,
}

fn opaque_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Graphics pipeline builder. Each setter replaces one state block.
pub struct GraphicsPipelineBuilder<'a> {
    stages: Vec<&'a ShaderModule>,
    dynamic_states: Vec<vk::DynamicState>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    primitive_restart: bool,
    viewport: ViewportState,
    rasterization: RasterizationState,
    multisample: MultisampleState,
    depth_stencil: DepthStencilState,
    patch_control_points: u32,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    color_attachment_count: u32,
    logic_op: Option<vk::LogicOp>,
    blend_constants: [f32; 4],
    subpass: u32,
    rendering: Option<RenderingFormats>,
    flags: vk::PipelineCreateFlags,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            dynamic_states: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            viewport: ViewportState::default(),
            rasterization: RasterizationState::default(),
            multisample: MultisampleState::default(),
            depth_stencil: DepthStencilState::default(),
            patch_control_points: 0,
            color_blend_attachment: opaque_attachment(),
            color_attachment_count: 1,
            logic_op: None,
            blend_constants: [0.0; 4],
            subpass: 0,
            rendering: None,
            flags: vk::PipelineCreateFlags::empty(),
        }
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shader stage.
    pub fn shader(mut self, shader: &'a ShaderModule) -> Self {
        self.stages.push(shader);
        self
    }

    /// Replace all shader stages.
    pub fn stages(mut self, shaders: &[&'a ShaderModule]) -> Self {
        self.stages = shaders.to_vec();
        self
    }

    pub fn dynamic_states(mut self, states: &[vk::DynamicState]) -> Self {
        self.dynamic_states = states.to_vec();
        self
    }

    pub fn vertex_input(
        mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn input_assembly(
        mut self,
        topology: vk::PrimitiveTopology,
        primitive_restart: bool,
    ) -> Self {
        self.topology = topology;
        self.primitive_restart = primitive_restart;
        self
    }

    /// Bake viewports and scissors into the pipeline.
    pub fn viewports(mut self, viewports: &[vk::Viewport], scissors: &[vk::Rect2D]) -> Self {
        self.viewport = ViewportState::Static {
            viewports: viewports.to_vec(),
            scissors: scissors.to_vec(),
        };
        self
    }

    /// Leave viewports and scissors to record time.
    pub fn dynamic_viewports(mut self, viewport_count: u32, scissor_count: u32) -> Self {
        self.viewport = ViewportState::Dynamic {
            viewport_count,
            scissor_count,
        };
        self
    }

    pub fn rasterization(mut self, state: RasterizationState) -> Self {
        self.rasterization = state;
        self
    }

    pub fn line_width(mut self, width: f32) -> Self {
        self.rasterization.line_width = width;
        self
    }

    pub fn multisample(mut self, state: MultisampleState) -> Self {
        self.multisample = state;
        self
    }

    pub fn depth_stencil(mut self, state: DepthStencilState) -> Self {
        self.depth_stencil = state;
        self
    }

    /// Depth test without stencil.
    pub fn depth_no_stencil(
        self,
        depth_test: bool,
        depth_write: bool,
        compare_op: vk::CompareOp,
    ) -> Self {
        self.depth_stencil(DepthStencilState::depth_only(depth_test, depth_write, compare_op))
    }

    /// Patch size for tessellation; only used when building with tessellation enabled.
    pub fn tessellation(mut self, patch_control_points: u32) -> Self {
        self.patch_control_points = patch_control_points;
        self
    }

    /// Blend template applied to every color attachment.
    pub fn color_blend_attachment(mut self, state: vk::PipelineColorBlendAttachmentState) -> Self {
        self.color_blend_attachment = state;
        self
    }

    /// Write all channels without blending.
    pub fn no_color_blend(self) -> Self {
        self.color_blend_attachment(opaque_attachment())
    }

    pub fn color_attachment_count(mut self, count: u32) -> Self {
        self.color_attachment_count = count;
        self
    }

    pub fn logic_op(mut self, op: Option<vk::LogicOp>) -> Self {
        self.logic_op = op;
        self
    }

    pub fn blend_constants(mut self, constants: [f32; 4]) -> Self {
        self.blend_constants = constants;
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    /// Attachment formats, required when building without a render pass.
    pub fn rendering_formats(mut self, formats: RenderingFormats) -> Self {
        self.rendering = Some(formats);
        self
    }

    pub fn flags(mut self, flags: vk::PipelineCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    fn effective_dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = self.dynamic_states.clone();
        if matches!(self.viewport, ViewportState::Dynamic { .. }) {
            for state in [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR] {
                if !states.contains(&state) {
                    states.push(state);
                }
            }
        }
        states
    }

    fn viewport_counts(&self) -> Result<(u32, u32)> {
        let count = |len: usize| {
            u32::try_from(len).map_err(|_| {
                GpuError::PipelineCreation(format!("{len} viewports or scissors"))
            })
        };
        Ok(match &self.viewport {
            ViewportState::Static {
                viewports,
                scissors,
            } => match (count(viewports.len())?, count(scissors.len())?) {
                (0, s) => (s, s),
                (v, 0) => (v, v),
                counts => counts,
            },
            ViewportState::Dynamic {
                viewport_count,
                scissor_count,
            } => (*viewport_count, *scissor_count),
        })
    }

    /// Check the builder state for inconsistencies the driver would not report.
    pub fn validate(&self, enable_tessellation: bool) -> Result<()> {
        let fail = |msg: String| Err(GpuError::PipelineCreation(msg));

        if self.stages.is_empty() {
            return fail("no shader stages".to_string());
        }
        let mut seen = vk::ShaderStageFlags::empty();
        for shader in &self.stages {
            let stage = shader.stage();
            if stage.intersects(vk::ShaderStageFlags::COMPUTE) {
                return fail("compute stage in a graphics pipeline".to_string());
            }
            if seen.intersects(stage) {
                return fail(format!("duplicate {stage:?} stage"));
            }
            seen |= stage;
        }
        if !seen.contains(vk::ShaderStageFlags::VERTEX) {
            return fail("no vertex stage".to_string());
        }

        let tess_stages = vk::ShaderStageFlags::TESSELLATION_CONTROL
            | vk::ShaderStageFlags::TESSELLATION_EVALUATION;
        let patch_list = self.topology == vk::PrimitiveTopology::PATCH_LIST;
        if enable_tessellation {
            if !seen.contains(vk::ShaderStageFlags::TESSELLATION_EVALUATION) {
                return fail("tessellation enabled without an evaluation stage".to_string());
            }
            if self.patch_control_points == 0 {
                return fail("tessellation enabled with zero patch control points".to_string());
            }
            if !patch_list {
                return fail("tessellation requires PATCH_LIST topology".to_string());
            }
        } else {
            if seen.intersects(tess_stages) {
                return fail("tessellation stages given but tessellation is disabled".to_string());
            }
            if patch_list {
                return fail("PATCH_LIST topology requires tessellation".to_string());
            }
        }

        let dynamic = self.effective_dynamic_states();
        if let ViewportState::Static {
            viewports,
            scissors,
        } = &self.viewport
        {
            if viewports.is_empty() && !dynamic.contains(&vk::DynamicState::VIEWPORT) {
                return fail("no viewports and VIEWPORT is not dynamic".to_string());
            }
            if scissors.is_empty() && !dynamic.contains(&vk::DynamicState::SCISSOR) {
                return fail("no scissors and SCISSOR is not dynamic".to_string());
            }
        }
        let (viewport_count, scissor_count) = self.viewport_counts()?;
        if viewport_count == 0 || viewport_count != scissor_count {
            return fail(format!(
                "viewport count {viewport_count} and scissor count {scissor_count} \
                 must match and be non-zero"
            ));
        }

        for (i, binding) in self.vertex_bindings.iter().enumerate() {
            if self.vertex_bindings[..i]
                .iter()
                .any(|b| b.binding == binding.binding)
            {
                return fail(format!("vertex binding {} declared twice", binding.binding));
            }
        }
        for (i, attribute) in self.vertex_attributes.iter().enumerate() {
            if !self
                .vertex_bindings
                .iter()
                .any(|b| b.binding == attribute.binding)
            {
                return fail(format!(
                    "vertex attribute {} uses undeclared binding {}",
                    attribute.location, attribute.binding
                ));
            }
            if self.vertex_attributes[..i]
                .iter()
                .any(|a| a.location == attribute.location)
            {
                return fail(format!(
                    "vertex attribute location {} declared twice",
                    attribute.location
                ));
            }
        }

        let line_width = self.rasterization.line_width;
        if line_width.is_nan() || line_width <= 0.0 {
            return fail(format!("line width {line_width} must be positive"));
        }

        let samples = self.multisample.samples.as_raw();
        if !samples.is_power_of_two() {
            return fail(format!("{:?} is not a single sample count", self.multisample.samples));
        }
        let mask_words = samples.div_ceil(32) as usize;
        let mask_len = self.multisample.sample_mask.len();
        if mask_len != 0 && mask_len != mask_words {
            return fail(format!(
                "sample mask has {mask_len} word(s), {mask_words} expected"
            ));
        }

        if let Some(rendering) = &self.rendering {
            if rendering.color_formats.len() != self.color_attachment_count as usize {
                return fail(format!(
                    "{} color format(s) for {} color attachment(s)",
                    rendering.color_formats.len(),
                    self.color_attachment_count
                ));
            }
        }
        Ok(())
    }

    /// Build the pipeline. A null `render_pass` selects dynamic rendering, which needs
    /// [`GraphicsPipelineBuilder::rendering_formats`].
    ///
    /// # Safety
    /// The device, render pass, layout, cache and shader modules must be valid.
    pub unsafe fn build(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        enable_tessellation: bool,
        cache: Option<&PipelineCache>,
    ) -> Result<Pipeline> {
        self.validate(enable_tessellation)?;
        if render_pass == vk::RenderPass::null() && self.rendering.is_none() {
            return Err(GpuError::PipelineCreation(
                "no render pass and no dynamic rendering formats".to_string(),
            ));
        }

        let spec_infos: Vec<Option<vk::SpecializationInfo<'_>>> = self
            .stages
            .iter()
            .map(|s| s.specialization().map(Specialization::info))
            .collect();
        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = self
            .stages
            .iter()
            .zip(&spec_infos)
            .map(|(shader, spec)| shader.stage_info(spec.as_ref()))
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart);

        let (viewport_count, scissor_count) = self.viewport_counts()?;
        let mut viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(viewport_count)
            .scissor_count(scissor_count);
        if let ViewportState::Static {
            viewports,
            scissors,
        } = &self.viewport
        {
            if !viewports.is_empty() {
                viewport_state = viewport_state.viewports(viewports);
            }
            if !scissors.is_empty() {
                viewport_state = viewport_state.scissors(scissors);
            }
        }

        let raster = &self.rasterization;
        let bias = raster.depth_bias.unwrap_or(DepthBias {
            constant_factor: 0.0,
            clamp: 0.0,
            slope_factor: 0.0,
        });
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(raster.depth_clamp)
            .rasterizer_discard_enable(raster.rasterizer_discard)
            .polygon_mode(raster.polygon_mode)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(raster.depth_bias.is_some())
            .depth_bias_constant_factor(bias.constant_factor)
            .depth_bias_clamp(bias.clamp)
            .depth_bias_slope_factor(bias.slope_factor)
            .line_width(raster.line_width);

        let ms = &self.multisample;
        let mut multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(ms.samples)
            .sample_shading_enable(ms.sample_shading.is_some())
            .min_sample_shading(ms.sample_shading.unwrap_or(0.0))
            .alpha_to_coverage_enable(ms.alpha_to_coverage)
            .alpha_to_one_enable(ms.alpha_to_one);
        if !ms.sample_mask.is_empty() {
            multisampling = multisampling.sample_mask(&ms.sample_mask);
        }

        let ds = &self.depth_stencil;
        let (min_depth, max_depth) = ds.depth_bounds.unwrap_or((0.0, 1.0));
        let mut depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(ds.depth_test)
            .depth_write_enable(ds.depth_write)
            .depth_compare_op(ds.compare_op)
            .depth_bounds_test_enable(ds.depth_bounds.is_some())
            .min_depth_bounds(min_depth)
            .max_depth_bounds(max_depth)
            .stencil_test_enable(ds.stencil.is_some());
        if let Some((front, back)) = ds.stencil {
            depth_stencil = depth_stencil.front(front).back(back);
        }

        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(self.patch_control_points);

        let attachments = vec![self.color_blend_attachment; self.color_attachment_count as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(self.logic_op.is_some())
            .logic_op(self.logic_op.unwrap_or(vk::LogicOp::COPY))
            .attachments(&attachments)
            .blend_constants(self.blend_constants);

        let dynamic_states = self.effective_dynamic_states();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = self.rendering.as_ref().map(|r| {
            vk::PipelineRenderingCreateInfo::default()
                .color_attachment_formats(&r.color_formats)
                .depth_attachment_format(r.depth_format)
                .stencil_attachment_format(r.stencil_format)
        });

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .flags(self.flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(self.subpass);
        if enable_tessellation {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }
        if render_pass == vk::RenderPass::null() {
            if let Some(rendering) = rendering_info.as_mut() {
                pipeline_info = pipeline_info.push_next(rendering);
            }
        }

        let cache = cache.map_or(vk::PipelineCache::null(), PipelineCache::handle);
        let pipeline = match device.create_graphics_pipelines(cache, &[pipeline_info], None) {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((pipelines, e)) => {
                destroy_partial(device, &pipelines);
                return Err(GpuError::PipelineRejected(e));
            }
        }
        .ok_or_else(|| GpuError::PipelineCreation("driver returned no pipeline".to_string()))?;

        tracing::debug!(?pipeline, stages = stages.len(), "created graphics pipeline");
        Ok(Pipeline {
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            flags: self.flags,
        })
    }

    /// Build the pipeline through a new cache seeded with `initial_data` and return both.
    ///
    /// # Safety
    /// Same as [`GraphicsPipelineBuilder::build`].
    pub unsafe fn build_with_cache(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: &PipelineLayout,
        enable_tessellation: bool,
        initial_data: &[u8],
    ) -> Result<(Pipeline, PipelineCache)> {
        let cache = PipelineCache::new(device, initial_data)?;
        match self.build(device, render_pass, layout, enable_tessellation, Some(&cache)) {
            Ok(pipeline) => Ok((pipeline, cache)),
            Err(e) => {
                cache.destroy(device);
                Err(e)
            }
        }
    }
}

unsafe fn destroy_partial(device: &ash::Device, pipelines: &[vk::Pipeline]) {
    for &pipeline in pipelines {
        if pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(pipeline, None);
        }
    }
}

/// Base pipeline of a derivative compute pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub enum BasePipeline<'a> {
    #[default]
    None,
    /// An already created pipeline.
    Handle(&'a Pipeline),
    /// An earlier entry of the same batch.
    Index(usize),
}

struct ComputeEntry<'a> {
    flags: vk::PipelineCreateFlags,
    shader: &'a ShaderModule,
    layout: &'a PipelineLayout,
    base: BasePipeline<'a>,
}

/// Batched compute pipeline builder.
#[derive(Default)]
pub struct ComputePipelineBuilder<'a> {
    entries: Vec<ComputeEntry<'a>>,
}

impl<'a> ComputePipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one pipeline. Pipelines are returned in the order they were added.
    pub fn add(
        mut self,
        flags: vk::PipelineCreateFlags,
        shader: &'a ShaderModule,
        layout: &'a PipelineLayout,
        base: BasePipeline<'a>,
    ) -> Self {
        self.entries.push(ComputeEntry {
            flags,
            shader,
            layout,
            base,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GpuError::PipelineCreation(msg));
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.shader.stage() != vk::ShaderStageFlags::COMPUTE {
                return fail(format!(
                    "entry {i} uses a {:?} shader",
                    entry.shader.stage()
                ));
            }
            let base_flags = match entry.base {
                BasePipeline::None
                    if entry.flags.contains(vk::PipelineCreateFlags::DERIVATIVE) =>
                {
                    return fail(format!("entry {i} is a DERIVATIVE without a base pipeline"));
                }
                BasePipeline::None => continue,
                BasePipeline::Index(base) if base >= i => {
                    return fail(format!("entry {i} derives from later entry {base}"));
                }
                BasePipeline::Index(base) => self.entries[base].flags,
                BasePipeline::Handle(pipeline) => {
                    if pipeline.bind_point() != vk::PipelineBindPoint::COMPUTE {
                        return fail(format!("entry {i} derives from a graphics pipeline"));
                    }
                    pipeline.flags()
                }
            };
            if !entry.flags.contains(vk::PipelineCreateFlags::DERIVATIVE) {
                return fail(format!("entry {i} has a base pipeline but no DERIVATIVE flag"));
            }
            if !base_flags.contains(vk::PipelineCreateFlags::ALLOW_DERIVATIVES) {
                return fail(format!(
                    "base of entry {i} was not created with ALLOW_DERIVATIVES"
                ));
            }
        }
        Ok(())
    }

    /// Create all queued pipelines in one driver call.
    ///
    /// # Safety
    /// The device, shader modules, layouts and cache must be valid.
    pub unsafe fn build(
        &self,
        device: &ash::Device,
        cache: Option<&PipelineCache>,
    ) -> Result<Vec<Pipeline>> {
        self.validate()?;
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let spec_infos: Vec<Option<vk::SpecializationInfo<'_>>> = self
            .entries
            .iter()
            .map(|e| e.shader.specialization().map(Specialization::info))
            .collect();

        let create_infos = self
            .entries
            .iter()
            .zip(&spec_infos)
            .map(|(entry, spec)| {
                let info = vk::ComputePipelineCreateInfo::default()
                    .flags(entry.flags)
                    .stage(entry.shader.stage_info(spec.as_ref()))
                    .layout(entry.layout.handle())
                    .base_pipeline_index(-1);
                Ok(match entry.base {
                    BasePipeline::None => info,
                    BasePipeline::Handle(base) => info.base_pipeline_handle(base.handle()),
                    BasePipeline::Index(base) => {
                        let index = i32::try_from(base).map_err(|_| {
                            GpuError::PipelineCreation(format!("base index {base} out of range"))
                        })?;
                        info.base_pipeline_index(index)
                    }
                })
            })
            .collect::<Result<Vec<vk::ComputePipelineCreateInfo<'_>>>>()?;

        let cache = cache.map_or(vk::PipelineCache::null(), PipelineCache::handle);
        let pipelines = match device.create_compute_pipelines(cache, &create_infos, None) {
            Ok(pipelines) => pipelines,
            Err((pipelines, e)) => {
                destroy_partial(device, &pipelines);
                return Err(GpuError::PipelineRejected(e));
            }
        };

        tracing::debug!(count = pipelines.len(), "created compute pipelines");
        Ok(pipelines
            .into_iter()
            .zip(&self.entries)
            .map(|(pipeline, entry)| Pipeline {
                pipeline,
                bind_point: vk::PipelineBindPoint::COMPUTE,
                flags: entry.flags,
            })
            .collect())
    }
}
