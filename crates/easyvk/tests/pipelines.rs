mod common;

use ash::vk;
use easyvk::{
    BasePipeline, ComputePipelineBuilder, DescriptorSetLayoutBuilder, ErrorKind, GpuError,
    GraphicsPipelineBuilder, PipelineLayout, ShaderModule, Specialization,
};

unsafe fn color_render_pass(device: &ash::Device) -> vk::RenderPass {
    let attachment = vk::AttachmentDescription::default()
        .format(vk::Format::R8G8B8A8_UNORM)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));
    let info = vk::RenderPassCreateInfo::default()
        .attachments(std::slice::from_ref(&attachment))
        .subpasses(std::slice::from_ref(&subpass));
    device.create_render_pass(&info, None).unwrap()
}

#[test]
fn graphics_pipelines_build_through_a_serialized_cache() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let vertex = common::shader(&ctx, vk::ShaderStageFlags::VERTEX, &common::vertex_spirv());
        let fragment =
            common::shader(&ctx, vk::ShaderStageFlags::FRAGMENT, &common::fragment_spirv());
        let layout = PipelineLayout::new(device, &[], &[]).unwrap();
        let render_pass = color_render_pass(device);

        let builder = GraphicsPipelineBuilder::new()
            .stages(&[&vertex, &fragment])
            .no_color_blend();

        let (first, first_cache) = builder
            .build_with_cache(device, render_pass, &layout, false, &[])
            .unwrap();
        let (second, second_cache) = builder
            .build_with_cache(device, render_pass, &layout, false, &[])
            .unwrap();

        let blob = first_cache.data(device).unwrap();
        let (third, third_cache) = builder
            .build_with_cache(device, render_pass, &layout, false, &blob)
            .unwrap();

        for pipeline in [&first, &second, &third] {
            assert_eq!(pipeline.bind_point(), vk::PipelineBindPoint::GRAPHICS);
            assert_ne!(pipeline.handle(), vk::Pipeline::null());
        }
        assert!(!third_cache.data(device).unwrap().is_empty());

        // Tessellation stages are not requested by this builder.
        let err = builder
            .build(device, render_pass, &layout, true, None)
            .unwrap_err();
        assert!(matches!(err, GpuError::PipelineCreation(_)));

        for pipeline in [first, second, third] {
            pipeline.destroy(device);
        }
        for cache in [first_cache, second_cache, third_cache] {
            cache.destroy(device);
        }
        device.destroy_render_pass(render_pass, None);
        layout.destroy(device);
        vertex.destroy(device);
        fragment.destroy(device);
    }
}

#[test]
fn compute_batch_builds_in_order_with_derivatives() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let spirv = common::compute_spirv();
        let plain = common::shader(&ctx, vk::ShaderStageFlags::COMPUTE, &spirv);
        let specialized = ShaderModule::from_words(
            device,
            vk::ShaderStageFlags::COMPUTE,
            &spirv,
            "main",
            Some(Specialization::new().constant(0, 64u32)),
        )
        .unwrap();

        let set_layout = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap();
        let push = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(16);
        let layout = PipelineLayout::new(device, &[&set_layout], &[push]).unwrap();

        let pipelines = ComputePipelineBuilder::new()
            .add(
                vk::PipelineCreateFlags::ALLOW_DERIVATIVES,
                &plain,
                &layout,
                BasePipeline::None,
            )
            .add(
                vk::PipelineCreateFlags::DERIVATIVE,
                &specialized,
                &layout,
                BasePipeline::Index(0),
            )
            .build(device, None)
            .unwrap();
        assert_eq!(pipelines.len(), 2);
        assert!(pipelines
            .iter()
            .all(|p| p.bind_point() == vk::PipelineBindPoint::COMPUTE));
        assert!(pipelines[0]
            .flags()
            .contains(vk::PipelineCreateFlags::ALLOW_DERIVATIVES));

        let derived = ComputePipelineBuilder::new()
            .add(
                vk::PipelineCreateFlags::DERIVATIVE,
                &plain,
                &layout,
                BasePipeline::Handle(&pipelines[0]),
            )
            .build(device, None)
            .unwrap();

        // A vertex shader can never be part of a compute batch.
        let vertex = common::shader(&ctx, vk::ShaderStageFlags::VERTEX, &common::vertex_spirv());
        let err = ComputePipelineBuilder::new()
            .add(
                vk::PipelineCreateFlags::empty(),
                &vertex,
                &layout,
                BasePipeline::None,
            )
            .build(device, None)
            .unwrap_err();
        assert!(matches!(err, GpuError::PipelineCreation(_)));

        for pipeline in derived.into_iter().chain(pipelines) {
            pipeline.destroy(device);
        }
        layout.destroy(device);
        set_layout.destroy(device);
        vertex.destroy(device);
        specialized.destroy(device);
        plain.destroy(device);
    }
}

#[test]
fn derivative_without_base_is_rejected_before_the_driver() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let shader = common::shader(&ctx, vk::ShaderStageFlags::COMPUTE, &common::compute_spirv());
        let layout = PipelineLayout::new(device, &[], &[]).unwrap();

        let err = ComputePipelineBuilder::new()
            .add(
                vk::PipelineCreateFlags::DERIVATIVE,
                &shader,
                &layout,
                BasePipeline::None,
            )
            .build(device, None)
            .unwrap_err();
        assert!(matches!(err, GpuError::PipelineCreation(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        layout.destroy(device);
        shader.destroy(device);
    }
}

#[test]
fn malformed_shader_code_is_rejected_before_the_driver() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    let mut bytes: Vec<u8> = common::compute_spirv()
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    bytes.pop();
    let err = unsafe {
        ShaderModule::from_bytes(device, vk::ShaderStageFlags::COMPUTE, &bytes, "main", None)
    }
    .err()
    .unwrap();
    assert!(matches!(err, GpuError::InvalidShaderCode(_)));
}
