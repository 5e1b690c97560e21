mod common;

use ash::vk;
use easyvk::{
    submit, CommandBufferState, CommandPool, ErrorKind, Fence, GpuError, GraphicsPipelineBuilder,
    PipelineLayout, RenderingFormats, Semaphore, SubmitSync,
};
use easyvk_bootstrap::BootstrapConfig;

#[test]
fn signaled_fence_is_ready_without_submission() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let fence = Fence::create_signaled(device).unwrap();
        assert!(fence.wait(device, 0).unwrap());
        assert!(fence.status(device).unwrap());

        fence.reset(device).unwrap();
        assert!(!fence.status(device).unwrap());
        assert!(!fence.wait(device, 0).unwrap());
        fence.destroy(device);

        let fence = Fence::create(device, vk::FenceCreateFlags::empty()).unwrap();
        fence.reset(device).unwrap();
        assert!(!fence.wait(device, 0).unwrap());
        fence.destroy(device);
    }
}

#[test]
fn recording_outside_recording_state_is_rejected() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        let err = cmd
            .recorder(device)
            .dispatch(1, 1, 1)
            .err()
            .expect("dispatch before begin");
        assert!(matches!(
            err,
            GpuError::StateViolation {
                state: CommandBufferState::Initial,
                ..
            }
        ));

        cmd.begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        cmd.end(device).unwrap();
        let err = cmd
            .recorder(device)
            .dispatch(1, 1, 1)
            .err()
            .expect("dispatch after end");
        assert_eq!(err.kind(), ErrorKind::StateViolation);
        assert_eq!(cmd.state(), CommandBufferState::Executable);

        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
    }
}

#[test]
fn individual_reset_needs_resettable_pool() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let pool = CommandPool::new(
            device,
            vk::CommandPoolCreateFlags::empty(),
            ctx.queue_family(),
        )
        .unwrap();
        assert!(!pool.allows_individual_reset());

        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        cmd.begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        cmd.end(device).unwrap();

        let err = cmd
            .reset(device, vk::CommandBufferResetFlags::empty())
            .unwrap_err();
        assert!(matches!(err, GpuError::Unsupported(_)));
        assert!(cmd
            .begin(device, vk::CommandBufferUsageFlags::empty())
            .is_err());

        // The whole pool can still be reset.
        pool.reset(device, vk::CommandPoolResetFlags::empty())
            .unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        cmd.begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        cmd.end(device).unwrap();

        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
    }
}

#[test]
fn submission_signals_fence_and_semaphore_chain() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let mut buffers = pool
            .allocate_many(device, vk::CommandBufferLevel::PRIMARY, 2)
            .unwrap();
        for cmd in &mut buffers {
            cmd.begin(device, vk::CommandBufferUsageFlags::empty())
                .unwrap();
            cmd.recorder(device)
                .memory_barrier(
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                )
                .unwrap();
            cmd.end(device).unwrap();
        }
        let (first, second) = buffers.split_at_mut(1);
        let (first, second) = (&mut first[0], &mut second[0]);

        let semaphore = Semaphore::create(device).unwrap();
        let fence = Fence::create(device, vk::FenceCreateFlags::empty()).unwrap();

        submit(
            device,
            ctx.queue(),
            &mut [&mut *first],
            &SubmitSync::new().signal(&semaphore),
            None,
        )
        .unwrap();
        submit(
            device,
            ctx.queue(),
            &mut [&mut *second],
            &SubmitSync::new().wait(&semaphore, vk::PipelineStageFlags::ALL_COMMANDS),
            Some(&fence),
        )
        .unwrap();
        assert_eq!(second.state(), CommandBufferState::Pending);

        // Pending buffers cannot be resubmitted.
        let err = submit(
            device,
            ctx.queue(),
            &mut [&mut *second],
            &SubmitSync::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateViolation);

        assert!(fence.wait(device, u64::MAX).unwrap());
        first.complete();
        second.complete();
        // Buffers of a resettable pool must be recorded again before resubmission.
        assert_eq!(second.state(), CommandBufferState::Initial);
        assert!(submit(
            device,
            ctx.queue(),
            &mut [&mut *second],
            &SubmitSync::new(),
            None
        )
        .is_err());

        fence.destroy(device);
        semaphore.destroy(device);
        pool.free(device, buffers).unwrap();
        pool.destroy(device);
    }
}

#[test]
fn destroyed_pool_invalidates_its_buffers() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        pool.destroy(device);

        assert_eq!(cmd.state(), CommandBufferState::Invalid);
        let err = cmd
            .begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateViolation);
        assert!(cmd.recorder(device).dispatch(1, 1, 1).is_err());
    }
}

#[test]
fn completed_buffer_of_fixed_pool_waits_for_pool_reset() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let pool = CommandPool::new(
            device,
            vk::CommandPoolCreateFlags::TRANSIENT,
            ctx.queue_family(),
        )
        .unwrap();
        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        cmd.begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        cmd.end(device).unwrap();

        let fence = Fence::create(device, vk::FenceCreateFlags::empty()).unwrap();
        submit(
            device,
            ctx.queue(),
            &mut [&mut cmd],
            &SubmitSync::new(),
            Some(&fence),
        )
        .unwrap();
        assert!(fence.wait(device, u64::MAX).unwrap());
        cmd.complete();
        assert_eq!(cmd.state(), CommandBufferState::Invalid);
        assert!(cmd
            .begin(device, vk::CommandBufferUsageFlags::empty())
            .is_err());

        pool.reset(device, vk::CommandPoolResetFlags::empty())
            .unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        fence.destroy(device);
        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
    }
}

#[test]
fn draws_and_subpasses_need_an_open_pass() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        cmd.begin(device, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        {
            let mut rec = cmd.recorder(device);
            let err = rec.draw(3, 1, 0, 0).err().expect("draw outside a pass");
            assert!(matches!(
                err,
                GpuError::StateViolation {
                    operation: "draw",
                    state: CommandBufferState::Recording,
                }
            ));
            assert!(rec.draw_indexed(3, 1, 0, 0, 0).is_err());
            let err = rec
                .next_subpass(vk::SubpassContents::INLINE)
                .err()
                .expect("next_subpass outside a pass");
            assert_eq!(err.kind(), ErrorKind::StateViolation);
            assert!(rec.end_render_pass().is_err());
            assert!(rec.end_rendering().is_err());
        }
        cmd.end(device).unwrap();

        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
    }
}

#[test]
fn dynamic_rendering_records_a_draw_end_to_end() {
    let config = BootstrapConfig::new()
        .app_name("easyvk-tests")
        .api_version(vk::API_VERSION_1_3);
    let Some(ctx) = common::context_with(&config) else { return };
    if !ctx.features().dynamic_rendering {
        tracing::warn!("skipping: dynamic rendering is not available");
        return;
    }
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let vertex = common::shader(&ctx, vk::ShaderStageFlags::VERTEX, &common::vertex_spirv());
        let fragment =
            common::shader(&ctx, vk::ShaderStageFlags::FRAGMENT, &common::fragment_spirv());
        let layout = PipelineLayout::new(device, &[], &[]).unwrap();
        let pipeline = GraphicsPipelineBuilder::new()
            .stages(&[&vertex, &fragment])
            .color_attachment_count(0)
            .rendering_formats(RenderingFormats::default())
            .build(device, vk::RenderPass::null(), &layout, false, None)
            .unwrap();

        let extent = vk::Extent2D {
            width: 16,
            height: 16,
        };
        let area = vk::Rect2D::default().extent(extent);
        let viewport = vk::Viewport::default()
            .width(16.0)
            .height(16.0)
            .max_depth(1.0);
        let rendering = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1);

        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        cmd.begin_one_time_submit(device).unwrap();
        {
            let mut rec = cmd.recorder(device);
            rec.begin_rendering(&rendering).unwrap();
            assert!(rec.begin_rendering(&rendering).is_err());
            assert!(rec
                .begin_render_pass(
                    &vk::RenderPassBeginInfo::default(),
                    vk::SubpassContents::INLINE
                )
                .is_err());
            assert!(rec.next_subpass(vk::SubpassContents::INLINE).is_err());
            assert!(rec.end_render_pass().is_err());
            assert!(rec.dispatch(1, 1, 1).is_err());

            rec.bind_pipeline(&pipeline)
                .unwrap()
                .set_viewport(0, &[viewport])
                .unwrap()
                .set_scissor(0, &[area])
                .unwrap()
                .draw(3, 1, 0, 0)
                .unwrap();
        }
        // The rendering instance is still open.
        assert!(cmd.end(device).is_err());
        cmd.recorder(device).end_rendering().unwrap();
        cmd.end(device).unwrap();

        let fence = Fence::create(device, vk::FenceCreateFlags::empty()).unwrap();
        submit(
            device,
            ctx.queue(),
            &mut [&mut cmd],
            &SubmitSync::new(),
            Some(&fence),
        )
        .unwrap();
        assert!(fence.wait(device, u64::MAX).unwrap());
        cmd.complete();

        fence.destroy(device);
        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
        pipeline.destroy(device);
        layout.destroy(device);
        vertex.destroy(device);
        fragment.destroy(device);
    }
}
