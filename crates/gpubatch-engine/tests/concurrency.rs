//! Integration test: recording from several threads
//!
//! Each operation's barrier and payload must be recorded back to back even
//! when threads race on the shared command buffer.

mod common;

use std::thread;

use gpubatch_engine::{Call, ScalarType, StorageBuffer};

use common::{setup, staging_buffer, transfer_barrier};

const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 50;

#[test]
fn test_concurrent_copies_do_not_interleave() {
    let (device, ctx) = setup(7);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let src = staging_buffer(&device, 256);
                let dst = staging_buffer(&device, 256);
                for _ in 0..OPS_PER_THREAD {
                    ctx.submit_copy(
                        &transfer_barrier(&src),
                        &src,
                        &dst,
                        [64, 1, 1],
                        [0, 0, 0],
                        [0, 0, 0],
                    )
                    .expect("copy");
                }
                ctx.register_buffer_cleanup(src);
                ctx.register_buffer_cleanup(dst);
            });
        }
    });
    ctx.flush().expect("flush");

    let recorded: Vec<Call> = device
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Barrier { .. }) || c.is_operation())
        .collect();
    assert_eq!(recorded.len(), 2 * THREADS * OPS_PER_THREAD);

    for pair in recorded.chunks(2) {
        let (Call::Barrier { cmd, barrier }, Call::CopyBuffer { cmd: copy_cmd, src, .. }) =
            (&pair[0], &pair[1])
        else {
            panic!("barrier not followed by its copy: {:?}", pair);
        };
        assert_eq!(cmd, copy_cmd);
        assert_eq!(barrier.buffers[0].buffer, *src);
    }

    let total = THREADS * OPS_PER_THREAD;
    assert_eq!(device.submissions().len(), total.div_ceil(7));
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn test_concurrent_wrapper_drops_are_all_released() {
    let (device, ctx) = setup(16);

    thread::scope(|s| {
        for t in 0..THREADS {
            let ctx = &ctx;
            s.spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let _buffer = StorageBuffer::new(ctx, ScalarType::I32, 1 + t + i, true)
                        .expect("buffer");
                }
            });
        }
    });

    assert_eq!(ctx.pending_cleanups().0, THREADS * OPS_PER_THREAD);
    ctx.flush().expect("flush");
    assert_eq!(
        device.count(|c| matches!(c, Call::DestroyBuffer(_))),
        THREADS * OPS_PER_THREAD
    );
    assert_eq!(device.live_buffers(), 0);
}
