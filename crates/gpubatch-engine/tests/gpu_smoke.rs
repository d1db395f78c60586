//! Integration test: real adapter
//!
//! Exercises the Vulkan backend end to end through the process-wide
//! context. Needs a Vulkan loader and a compute-capable adapter.
//!
//! Run with: cargo test --test gpu_smoke -- --ignored --nocapture

use ash::vk;
use gpubatch_engine::{runtime, BufferKind, Device, PipelineBarrier};

#[test]
#[ignore = "requires a Vulkan adapter"]
fn test_fenced_copy_on_default_adapter() {
    gpubatch_common::try_init_logging();
    let Some(ctx) = runtime::context() else {
        println!("no Vulkan adapter available, skipping");
        return;
    };
    println!("running on {}", ctx.device().name());

    let src = ctx
        .device()
        .create_buffer(1024, BufferKind::Staging)
        .expect("source buffer");
    let dst = ctx
        .device()
        .create_buffer(1024, BufferKind::Storage { gpu_only: true })
        .expect("destination buffer");
    let payload: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
    ctx.device().write_buffer(&src, &payload).expect("upload");

    let mut fence = ctx.fences().get_fence().expect("fence");
    let mut batch = ctx.begin_synchronized();
    batch
        .submit_copy(
            &PipelineBarrier::stages(
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TRANSFER,
            ),
            &src,
            &dst,
            [1024, 1, 1],
            [0, 0, 0],
            [0, 0, 0],
            Some(&mut fence),
        )
        .expect("copy");
    batch.flush().expect("flush");
    fence.wait().expect("fence wait");
    ctx.fences().return_fence(fence).expect("return fence");

    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);
    ctx.flush().expect("final flush");
    assert_eq!(ctx.pending_cleanups(), (0, 0));
}
