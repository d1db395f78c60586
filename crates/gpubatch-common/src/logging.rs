use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted for the log filter.
pub const LOG_ENV: &str = "GPUBATCH_LOG";

/// Initialize structured logging with environment filter.
/// Set GPUBATCH_LOG=debug (or trace, info, warn, error) for verbosity control.
/// Per-submission events are emitted at `debug`, so `GPUBATCH_LOG=gpubatch_engine=debug`
/// shows batching decisions without the rest of the process getting noisy.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Like [`init_logging`], but safe to call more than once (tests, embedders that
/// may have installed their own subscriber). Returns false if a global subscriber
/// was already set.
pub fn try_init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_test_writer()
        .try_init()
        .is_ok()
}
