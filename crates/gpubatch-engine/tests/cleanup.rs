//! Integration test: deferred resource release
//!
//! Dropped wrappers must not free GPU memory until the context is flushed,
//! and every registered resource must be released exactly once.

mod common;

use ash::vk;
use gpubatch_engine::{
    Call, Device, EngineError, ImageDesc, ScalarType, StorageBuffer, UniformParamsBuffer,
};

use common::{copy, setup, staging_buffer};

#[test]
fn test_dropped_buffers_are_released_on_flush() {
    let (device, ctx) = setup(16);
    const N: usize = 12;

    for i in 0..N {
        let buffer = StorageBuffer::new(&ctx, ScalarType::F32, 64 + i, true).expect("buffer");
        assert_eq!(buffer.nbytes(), (64 + i) * 4);
    }
    assert_eq!(ctx.pending_cleanups(), (N, 0));
    assert_eq!(device.live_buffers(), N);
    assert_eq!(device.count(|c| matches!(c, Call::DestroyBuffer(_))), 0);

    ctx.flush().expect("flush");
    assert_eq!(device.count(|c| matches!(c, Call::DestroyBuffer(_))), N);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(ctx.pending_cleanups(), (0, 0));

    // Nothing is released twice
    ctx.flush().expect("second flush");
    assert_eq!(device.count(|c| matches!(c, Call::DestroyBuffer(_))), N);
}

#[test]
fn test_release_happens_after_queue_drains() {
    let (device, ctx) = setup(16);
    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);
    copy(&ctx, &src, &dst);
    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);

    ctx.flush().expect("flush");

    let calls = device.calls();
    let wait = calls
        .iter()
        .position(|c| matches!(c, Call::WaitIdle))
        .expect("queue drained");
    let destroys: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::DestroyBuffer(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(destroys.len(), 2);
    assert!(destroys.iter().all(|&i| i > wait));
}

#[test]
fn test_images_use_their_own_queue() {
    let (device, ctx) = setup(16);
    let image = device
        .create_image(&ImageDesc::storage_3d(vk::Format::R8G8B8A8_UNORM, [8, 8, 1]))
        .expect("image");
    let handle = image.handle();

    ctx.register_image_cleanup(image);
    assert_eq!(ctx.pending_cleanups(), (0, 1));
    assert_eq!(device.live_images(), 1);

    ctx.flush().expect("flush");
    assert_eq!(device.live_images(), 0);
    assert!(device.calls().contains(&Call::DestroyImage(handle)));
}

#[test]
fn test_into_inner_opts_out_of_deferred_release() {
    let (device, ctx) = setup(16);
    let params = UniformParamsBuffer::new(&ctx, &[1.0f32, 2.0, 3.0, 4.0]).expect("params");
    let buffer = params.into_inner();
    assert_eq!(ctx.pending_cleanups(), (0, 0));

    ctx.flush().expect("flush");
    assert!(device.is_buffer_live(buffer.handle()));
    device.destroy_buffer(buffer);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn test_context_drop_flushes_and_drains() {
    let (device, ctx) = setup(16);
    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);
    {
        let _held = StorageBuffer::new(&ctx, ScalarType::U8, 32, false).expect("buffer");
        copy(&ctx, &src, &dst);
    }
    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);
    drop(ctx);

    assert_eq!(device.submissions().len(), 1);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(
        device.count(|c| matches!(c, Call::DestroyCommandPool(_))),
        1
    );
    assert_eq!(
        device.count(|c| matches!(c, Call::DestroyDescriptorPool(_))),
        1
    );
    assert_eq!(device.count(|c| matches!(c, Call::DestroyQueryPool(_))), 1);
}

#[test]
fn test_context_drop_drains_even_when_flush_fails() {
    let (device, ctx) = setup(16);
    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);
    copy(&ctx, &src, &dst);
    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);

    device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
    drop(ctx);

    assert!(device.submissions().is_empty());
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn test_allocation_failure_is_reported() {
    let (device, ctx) = setup(16);
    device.limit_buffers(1);
    let _first = StorageBuffer::new(&ctx, ScalarType::F32, 4, true).expect("first buffer");

    let err = match StorageBuffer::new(&ctx, ScalarType::F32, 4, true) {
        Ok(_) => panic!("second buffer should exceed the limit"),
        Err(e) => e,
    };
    assert!(matches!(
        err,
        EngineError::Allocation {
            what: "buffer",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        }
    ));
}

#[test]
fn test_zero_sized_storage_buffer_is_rejected() {
    let (device, ctx) = setup(16);
    let result = StorageBuffer::new(&ctx, ScalarType::F64, 0, true);
    assert!(matches!(result, Err(EngineError::Unsupported(_))));
    assert_eq!(device.live_buffers(), 0);
}
