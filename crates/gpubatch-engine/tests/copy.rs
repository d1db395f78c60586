//! Integration test: copy recording
//!
//! Covers the four supported source/destination pairs and how offsets and
//! ranges land in the recorded regions.

mod common;

use ash::vk;
use gpubatch_engine::{Call, Device, ImageDesc, PipelineBarrier, VulkanImage};

use common::{setup, staging_buffer, transfer_barrier};

fn image(device: &dyn Device) -> VulkanImage {
    device
        .create_image(&ImageDesc::storage_3d(vk::Format::R32_SFLOAT, [16, 16, 4]))
        .expect("image")
}

#[test]
fn test_all_copy_pairs_are_recorded() {
    let (device, ctx) = setup(16);
    let buffer_a = staging_buffer(&device, 4096);
    let buffer_b = staging_buffer(&device, 4096);
    let mut image_a = image(&*device);
    let mut image_b = image(&*device);
    image_a.set_layout(vk::ImageLayout::GENERAL);
    image_b.set_layout(vk::ImageLayout::GENERAL);
    let none = PipelineBarrier::none();

    ctx.submit_copy(&transfer_barrier(&buffer_a), &buffer_a, &buffer_b, [128, 1, 1], [16, 0, 0], [32, 0, 0])
        .expect("buffer to buffer");
    ctx.submit_copy(&none, &image_a, &image_b, [8, 8, 1], [0, 0, 0], [8, 8, 0])
        .expect("image to image");
    ctx.submit_copy(&none, &image_a, &buffer_a, [16, 16, 1], [0, 0, 2], [256, 0, 0])
        .expect("image to buffer");
    ctx.submit_copy(&none, &buffer_b, &image_b, [16, 16, 1], [512, 0, 0], [0, 0, 3])
        .expect("buffer to image");

    let payloads: Vec<Call> = device
        .calls()
        .into_iter()
        .filter(|c| c.is_operation())
        .collect();
    assert_eq!(payloads.len(), 4);

    match &payloads[0] {
        Call::CopyBuffer {
            src,
            dst,
            src_offset,
            dst_offset,
            size,
            ..
        } => {
            assert_eq!((*src, *dst), (buffer_a.handle(), buffer_b.handle()));
            assert_eq!((*src_offset, *dst_offset, *size), (16, 32, 128));
        }
        other => panic!("expected a buffer copy, got {:?}", other),
    }
    assert!(matches!(
        &payloads[1],
        Call::CopyImage { src, dst, extent: [8, 8, 1], .. }
            if *src == image_a.handle() && *dst == image_b.handle()
    ));
    assert!(matches!(
        &payloads[2],
        Call::CopyImageToBuffer { buffer_offset: 256, extent: [16, 16, 1], .. }
    ));
    assert!(matches!(
        &payloads[3],
        Call::CopyBufferToImage { buffer_offset: 512, extent: [16, 16, 1], .. }
    ));

    // Only the non-empty barrier is recorded
    assert_eq!(device.count(|c| matches!(c, Call::Barrier { .. })), 1);
    assert_eq!(ctx.submit_count(), 4);

    ctx.register_buffer_cleanup(buffer_a);
    ctx.register_buffer_cleanup(buffer_b);
    ctx.register_image_cleanup(image_a);
    ctx.register_image_cleanup(image_b);
}

#[test]
fn test_layout_transition_barrier_is_recorded_before_copy() {
    let (device, ctx) = setup(16);
    let buffer = staging_buffer(&device, 4096);
    let mut target = image(&*device);

    let transition = target.transition(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::AccessFlags::empty(),
        vk::AccessFlags::TRANSFER_WRITE,
    );
    let barrier = PipelineBarrier::stages(
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
    )
    .with_image(transition);
    target.set_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL);

    ctx.submit_copy(&barrier, &buffer, &target, [16, 16, 4], [0, 0, 0], [0, 0, 0])
        .expect("upload");

    let recorded: Vec<Call> = device
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Barrier { .. }) || c.is_operation())
        .collect();
    match &recorded[..] {
        [Call::Barrier { barrier, .. }, Call::CopyBufferToImage { dst, .. }] => {
            assert_eq!(barrier.images[0].old_layout, vk::ImageLayout::UNDEFINED);
            assert_eq!(barrier.images[0].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            assert_eq!(*dst, target.handle());
        }
        other => panic!("unexpected recording: {:?}", other),
    }

    ctx.register_buffer_cleanup(buffer);
    ctx.register_image_cleanup(target);
}
