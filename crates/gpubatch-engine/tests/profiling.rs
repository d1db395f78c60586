//! Integration test: timestamp profiling
//!
//! With profiling enabled every copy and dispatch is bracketed by a pair of
//! timestamps; copies are labelled `cmd_copy`.

mod common;

use gpubatch_engine::{
    Call, ContextConfig, EngineError, PipelineBarrier, QueryPoolConfig, ScalarType, StorageBuffer,
    UniformParamsBuffer,
};

use common::{add_shader, copy, setup, setup_with, staging_buffer};

#[test]
fn test_operations_are_bracketed_by_timestamps() {
    let (device, ctx) = setup(16);
    ctx.enable_op_profiling();
    ctx.reset_querypool().expect("reset");

    let args: Vec<StorageBuffer> = (0..3)
        .map(|_| StorageBuffer::new(&ctx, ScalarType::F32, 64, true).expect("buffer"))
        .collect();
    let params = UniformParamsBuffer::new(&ctx, &[64u32, 0]).expect("params");
    ctx.submit_compute_job(
        &add_shader(),
        &PipelineBarrier::none(),
        [64, 1, 1],
        [32, 1, 1],
        &[&args[0], &args[1], &args[2], &params],
    )
    .expect("dispatch");

    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);
    copy(&ctx, &src, &dst);
    ctx.flush().expect("flush");

    // Timestamps surround the payload of each operation
    let recorded: Vec<Call> = device
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::WriteTimestamp { .. }) || c.is_operation())
        .collect();
    assert_eq!(recorded.len(), 6);
    assert!(matches!(recorded[0], Call::WriteTimestamp { query: 0, .. }));
    assert!(matches!(recorded[1], Call::Dispatch { .. }));
    assert!(matches!(recorded[2], Call::WriteTimestamp { query: 1, .. }));
    assert!(matches!(recorded[3], Call::WriteTimestamp { query: 2, .. }));
    assert!(matches!(recorded[4], Call::CopyBuffer { .. }));
    assert!(matches!(recorded[5], Call::WriteTimestamp { query: 3, .. }));

    let results = ctx.querypool().extract_results().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].label, "binary_add");
    assert_eq!(results[0].global, [64, 1, 1]);
    assert_eq!(results[0].local, [32, 1, 1]);
    assert_eq!(results[1].label, "cmd_copy");
    assert_eq!(results[1].global, [0, 0, 0]);
    assert_eq!(results[1].local, [0, 0, 0]);
    // One period-scaled tick step per query
    assert!(results.iter().all(|r| r.duration_ns() == 1000));

    let report = ctx.querypool().generate_report().expect("report");
    assert!(report.contains("binary_add"));
    assert!(report.contains("cmd_copy"));

    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);
}

#[test]
fn test_profiling_is_off_by_default() {
    let (device, ctx) = setup(16);
    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);
    copy(&ctx, &src, &dst);

    assert!(!ctx.op_profiling_enabled());
    assert_eq!(device.count(|c| matches!(c, Call::WriteTimestamp { .. })), 0);
    assert_eq!(ctx.querypool().queries_in_use(), 0);
}

#[test]
fn test_exhausted_query_pool_is_an_error() {
    let config = ContextConfig {
        query_pool: QueryPoolConfig {
            max_query_count: 2,
            initial_reserve_size: 1,
        },
        ..ContextConfig::default()
    };
    let (device, ctx) = setup_with(config);
    ctx.enable_op_profiling();
    let src = staging_buffer(&device, 256);
    let dst = staging_buffer(&device, 256);

    copy(&ctx, &src, &dst);
    let err = ctx
        .submit_copy(
            &PipelineBarrier::none(),
            &src,
            &dst,
            [64, 1, 1],
            [0, 0, 0],
            [0, 0, 0],
        )
        .expect_err("no queries left");
    assert!(matches!(err, EngineError::Allocation { .. }));

    // Resetting makes the queries available again
    ctx.reset_querypool().expect("reset");
    copy(&ctx, &src, &dst);
    assert_eq!(ctx.querypool().queries_in_use(), 2);
}
