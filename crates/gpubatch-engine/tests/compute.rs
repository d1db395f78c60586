//! Integration test: compute dispatch recording
//!
//! Verifies positional argument binding, tile and local-size division,
//! the pipeline/descriptor/barrier/dispatch order and argument checking.

mod common;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpubatch_engine::{
    Bindable, Call, DescriptorResource, Device, EngineError, ImageDesc, PipelineBarrier,
    RecordingDevice, ScalarType, StorageBuffer, UniformParamsBuffer,
};

use common::{add_shader, setup};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AddParams {
    numel: u32,
    alpha: f32,
}

fn buffer_handle(resource: &dyn Bindable) -> vk::Buffer {
    match resource.descriptor() {
        DescriptorResource::Buffer { buffer, .. } => buffer,
        other => panic!("expected a buffer descriptor, got {:?}", other),
    }
}

#[test]
fn test_arguments_bind_in_order() {
    let (device, ctx) = setup(16);
    let a = StorageBuffer::new(&ctx, ScalarType::F32, 100, true).expect("a");
    let b = StorageBuffer::new(&ctx, ScalarType::F32, 100, true).expect("b");
    let out = StorageBuffer::new(&ctx, ScalarType::F32, 100, true).expect("out");
    let params = UniformParamsBuffer::new(
        &ctx,
        &AddParams {
            numel: 100,
            alpha: 1.0,
        },
    )
    .expect("params");

    ctx.submit_compute_job(
        &add_shader(),
        &PipelineBarrier::none(),
        [100, 1, 1],
        [64, 1, 1],
        &[&a, &b, &out, &params],
    )
    .expect("dispatch");

    let writes = device
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::UpdateDescriptorSet { writes, .. } => Some(writes),
            _ => None,
        })
        .expect("descriptor set written");
    assert_eq!(writes.len(), 4);

    let expected: [&dyn Bindable; 4] = [&a, &b, &out, &params];
    for (slot, (write, argument)) in writes.iter().zip(expected).enumerate() {
        assert_eq!(write.binding, slot as u32);
        match write.resource {
            DescriptorResource::Buffer { buffer, .. } => {
                assert_eq!(buffer, buffer_handle(argument))
            }
            DescriptorResource::Image { .. } => panic!("slot {} bound an image", slot),
        }
    }
    assert_eq!(writes[3].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
}

#[test]
fn test_uniform_params_are_uploaded() {
    let (device, ctx) = setup(16);
    let block = AddParams {
        numel: 7,
        alpha: 0.5,
    };
    let params = UniformParamsBuffer::new(&ctx, &block).expect("params");

    let contents = device
        .buffer_contents(params.buffer().handle())
        .expect("params written");
    assert_eq!(contents, bytemuck::bytes_of(&block));
    assert_eq!(params.buffer().size(), std::mem::size_of::<AddParams>() as u64);
}

fn dispatched_groups(device: &RecordingDevice) -> Vec<[u32; 3]> {
    device
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Dispatch { groups, .. } => Some(groups),
            _ => None,
        })
        .collect()
}

#[test]
fn test_global_size_is_divided_by_output_tile() {
    let (device, ctx) = setup(16);
    let shader = add_shader().with_tile_size([4, 4, 1]);
    let args: Vec<StorageBuffer> = (0..3)
        .map(|_| StorageBuffer::new(&ctx, ScalarType::F32, 4096, true).expect("buffer"))
        .collect();
    let params = UniformParamsBuffer::new(
        &ctx,
        &AddParams {
            numel: 4096,
            alpha: 1.0,
        },
    )
    .expect("params");
    let arguments: [&dyn Bindable; 4] = [&args[0], &args[1], &args[2], &params];

    // Partial tiles round up: 10x10 outputs need 3x3 invocations
    ctx.submit_compute_job(&shader, &PipelineBarrier::none(), [10, 10, 1], [1, 1, 1], &arguments)
        .expect("dispatch with unit local size");

    // 64x64 outputs need 16x16 invocations, i.e. 4x4 groups of 4x4
    ctx.submit_compute_job(&shader, &PipelineBarrier::none(), [64, 64, 1], [4, 4, 1], &arguments)
        .expect("dispatch with 4x4 local size");

    // 3x3 invocations still fit in one 4x4 group
    ctx.submit_compute_job(&shader, &PipelineBarrier::none(), [10, 10, 1], [4, 4, 1], &arguments)
        .expect("dispatch smaller than one group");

    assert_eq!(
        dispatched_groups(&device),
        vec![[3, 3, 1], [4, 4, 1], [1, 1, 1]]
    );
}

#[test]
fn test_zero_tile_or_local_size_is_rejected() {
    let (device, ctx) = setup(16);
    let args: Vec<StorageBuffer> = (0..3)
        .map(|_| StorageBuffer::new(&ctx, ScalarType::F32, 8, true).expect("buffer"))
        .collect();
    let params = UniformParamsBuffer::new(&ctx, &[8u32, 0]).expect("params");
    let arguments: [&dyn Bindable; 4] = [&args[0], &args[1], &args[2], &params];

    let err = ctx
        .submit_compute_job(
            &add_shader().with_tile_size([4, 0, 1]),
            &PipelineBarrier::none(),
            [8, 8, 1],
            [4, 4, 1],
            &arguments,
        )
        .expect_err("zero tile axis");
    assert!(matches!(err, EngineError::Unsupported(_)));

    let err = ctx
        .submit_compute_job(&add_shader(), &PipelineBarrier::none(), [8, 8, 1], [4, 0, 1], &arguments)
        .expect_err("zero local axis");
    assert!(matches!(err, EngineError::Unsupported(_)));

    assert!(dispatched_groups(&device).is_empty());
    assert_eq!(ctx.submit_count(), 0);
}

#[test]
fn test_dispatch_recording_order() {
    let (device, ctx) = setup(16);
    let a = StorageBuffer::new(&ctx, ScalarType::I32, 16, false).expect("a");
    let b = StorageBuffer::new(&ctx, ScalarType::I32, 16, false).expect("b");
    let out = StorageBuffer::new(&ctx, ScalarType::I32, 16, false).expect("out");
    let params = UniformParamsBuffer::new(
        &ctx,
        &AddParams {
            numel: 16,
            alpha: 1.0,
        },
    )
    .expect("params");
    let barrier = PipelineBarrier::stages(
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
    );

    ctx.submit_compute_job(&add_shader(), &barrier, [16, 1, 1], [16, 1, 1], &[&a, &b, &out, &params])
        .expect("dispatch");

    let recorded: Vec<Call> = device
        .calls()
        .into_iter()
        .filter(|c| c.command_buffer().is_some())
        .collect();
    assert!(matches!(recorded[0], Call::Begin(_)));
    assert!(matches!(recorded[1], Call::BindPipeline { .. }));
    assert!(matches!(recorded[2], Call::BindDescriptorSet { .. }));
    assert!(matches!(recorded[3], Call::Barrier { .. }));
    assert!(matches!(recorded[4], Call::Dispatch { .. }));
    assert_eq!(recorded.len(), 5);
}

#[test]
fn test_pipeline_is_cached_and_bound_once_per_command_buffer() {
    let (device, ctx) = setup(16);
    let args: Vec<StorageBuffer> = (0..3)
        .map(|_| StorageBuffer::new(&ctx, ScalarType::F32, 32, true).expect("buffer"))
        .collect();
    let params = UniformParamsBuffer::new(
        &ctx,
        &AddParams {
            numel: 32,
            alpha: 2.0,
        },
    )
    .expect("params");
    let shader = add_shader();
    let arguments: [&dyn Bindable; 4] = [&args[0], &args[1], &args[2], &params];

    for _ in 0..3 {
        ctx.submit_compute_job(&shader, &PipelineBarrier::none(), [32, 1, 1], [32, 1, 1], &arguments)
            .expect("dispatch");
    }
    assert_eq!(device.count(|c| matches!(c, Call::CreatePipeline { .. })), 1);
    assert_eq!(device.count(|c| matches!(c, Call::BindPipeline { .. })), 1);
    assert_eq!(device.count(|c| matches!(c, Call::BindDescriptorSet { .. })), 3);

    // A different local size is a different pipeline
    ctx.submit_compute_job(&shader, &PipelineBarrier::none(), [32, 1, 1], [16, 1, 1], &arguments)
        .expect("dispatch");
    assert_eq!(device.count(|c| matches!(c, Call::CreatePipeline { .. })), 2);
    assert_eq!(device.count(|c| matches!(c, Call::BindPipeline { .. })), 2);
}

#[test]
fn test_argument_count_mismatch_is_rejected() {
    let (device, ctx) = setup(16);
    let a = StorageBuffer::new(&ctx, ScalarType::F32, 8, true).expect("a");

    let err = ctx
        .submit_compute_job(&add_shader(), &PipelineBarrier::none(), [8, 1, 1], [8, 1, 1], &[&a])
        .expect_err("one argument for a four-slot layout");
    assert!(matches!(err, EngineError::Unsupported(_)));
    assert!(!err.is_fatal());
    assert_eq!(device.count(|c| matches!(c, Call::Dispatch { .. })), 0);
    assert_eq!(ctx.submit_count(), 0);
}

#[test]
fn test_argument_type_mismatch_is_rejected() {
    let (device, ctx) = setup(16);
    let a = StorageBuffer::new(&ctx, ScalarType::F32, 8, true).expect("a");
    let b = StorageBuffer::new(&ctx, ScalarType::F32, 8, true).expect("b");
    let image = device
        .create_image(&ImageDesc::storage_3d(vk::Format::R32_SFLOAT, [2, 2, 2]))
        .expect("image");

    let err = ctx
        .submit_compute_job(
            &add_shader(),
            &PipelineBarrier::none(),
            [8, 1, 1],
            [8, 1, 1],
            &[&a, &b, &image, &a],
        )
        .expect_err("image bound to a storage buffer slot");
    assert!(matches!(err, EngineError::Unsupported(_)));
    assert_eq!(device.count(|c| matches!(c, Call::Dispatch { .. })), 0);

    ctx.register_image_cleanup(image);
}

#[test]
fn test_descriptor_sets_are_recycled_on_flush() {
    let (_device, ctx) = setup(16);
    let args: Vec<StorageBuffer> = (0..3)
        .map(|_| StorageBuffer::new(&ctx, ScalarType::F32, 8, true).expect("buffer"))
        .collect();
    let params = UniformParamsBuffer::new(
        &ctx,
        &AddParams {
            numel: 8,
            alpha: 1.0,
        },
    )
    .expect("params");

    for _ in 0..5 {
        ctx.submit_compute_job(
            &add_shader(),
            &PipelineBarrier::none(),
            [8, 1, 1],
            [8, 1, 1],
            &[&args[0], &args[1], &args[2], &params],
        )
        .expect("dispatch");
    }
    assert_eq!(ctx.descriptor_pool().sets_in_use(), 5);

    ctx.flush().expect("flush");
    assert_eq!(ctx.descriptor_pool().sets_in_use(), 0);
}
