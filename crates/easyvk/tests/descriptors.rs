mod common;

use ash::vk;
use easyvk::{
    DescriptorPool, DescriptorPoolSizes, DescriptorSetLayoutBuilder, DescriptorWriter,
    ErrorKind, GpuError, MemoryLocation, PipelineLayout,
};

#[test]
fn pool_rejects_set_beyond_declared_capacity() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let layout = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap();
        let sizes = DescriptorPoolSizes::new().add(vk::DescriptorType::STORAGE_BUFFER, 3);
        let mut pool =
            DescriptorPool::new(device, vk::DescriptorPoolCreateFlags::empty(), 8, &sizes)
                .unwrap();

        for _ in 0..3 {
            pool.allocate_set(device, &layout).unwrap();
        }
        let err = pool.allocate_set(device, &layout).unwrap_err();
        assert!(matches!(err, GpuError::CapacityExhausted(_)));
        assert_eq!(pool.capacity().remaining_sets(), 5);

        pool.reset(device).unwrap();
        assert_eq!(
            pool.capacity().remaining(vk::DescriptorType::STORAGE_BUFFER),
            3
        );
        pool.allocate_set(device, &layout).unwrap();

        pool.destroy(device);
        layout.destroy(device);
    }
}

#[test]
fn freeing_sets_needs_the_free_flag() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();

    unsafe {
        let layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)
            .unwrap();
        let sizes = DescriptorPoolSizes::new().add(vk::DescriptorType::UNIFORM_BUFFER, 1);

        let mut fixed =
            DescriptorPool::new(device, vk::DescriptorPoolCreateFlags::empty(), 1, &sizes)
                .unwrap();
        let set = fixed.allocate_set(device, &layout).unwrap();
        let err = fixed.free_sets(device, [set]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        fixed.destroy(device);

        let mut freeable = DescriptorPool::new(
            device,
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            1,
            &sizes,
        )
        .unwrap();
        let set = freeable.allocate_set(device, &layout).unwrap();
        freeable.free_sets(device, [set]).unwrap();
        // The slot is available again.
        freeable.allocate_set(device, &layout).unwrap();
        freeable.destroy(device);

        layout.destroy(device);
    }
}

#[test]
fn written_set_binds_only_where_the_layout_matches() {
    let Some(ctx) = common::context() else { return };
    let device = ctx.device();
    let pool = common::resettable_pool(&ctx);

    unsafe {
        let layout = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap();
        let wider = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                2,
                vk::ShaderStageFlags::COMPUTE,
            )
            .build(device)
            .unwrap();

        let matching = PipelineLayout::new(device, &[&layout], &[]).unwrap();
        let mismatching = PipelineLayout::new(device, &[&wider], &[]).unwrap();

        let sizes = DescriptorPoolSizes::new().add(vk::DescriptorType::STORAGE_BUFFER, 1);
        let mut descriptor_pool =
            DescriptorPool::new(device, vk::DescriptorPoolCreateFlags::empty(), 1, &sizes)
                .unwrap();
        let set = descriptor_pool.allocate_set(device, &layout).unwrap();

        let buffer = ctx
            .allocator()
            .lock()
            .create_buffer_with_location(
                256,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryLocation::CpuToGpu,
                "descriptor target",
            )
            .unwrap();

        // Writes are checked against the set's layout before reaching the driver.
        let err = DescriptorWriter::new(&set)
            .uniform_buffer(0, buffer.handle(), 0, 256)
            .update(device)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
        let err = DescriptorWriter::new(&set)
            .storage_buffer(1, buffer.handle(), 0, 256)
            .update(device)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);

        DescriptorWriter::new(&set)
            .storage_buffer(0, buffer.handle(), 0, vk::WHOLE_SIZE)
            .update(device)
            .unwrap();

        let mut cmd = pool
            .allocate(device, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        cmd.begin(device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        {
            let mut rec = cmd.recorder(device);
            let compute = vk::PipelineBindPoint::COMPUTE;
            rec.bind_descriptor_set(compute, &matching, 0, &set).unwrap();

            let wrong_index = rec.bind_descriptor_set(compute, &matching, 1, &set);
            assert!(matches!(wrong_index, Err(GpuError::LayoutMismatch(_))));

            let wrong_count = rec.bind_descriptor_set(compute, &mismatching, 0, &set);
            assert!(matches!(wrong_count, Err(GpuError::LayoutMismatch(_))));

            let extra_offsets = rec.bind_descriptor_sets(compute, &matching, 0, &[&set], &[0]);
            assert!(matches!(extra_offsets, Err(GpuError::LayoutMismatch(_))));
        }
        cmd.end(device).unwrap();

        pool.free(device, [cmd]).unwrap();
        pool.destroy(device);
        ctx.allocator().lock().destroy_buffer(buffer).unwrap();
        descriptor_pool.destroy(device);
        matching.destroy(device);
        mismatching.destroy(device);
        wider.destroy(device);
        layout.destroy(device);
    }
}
