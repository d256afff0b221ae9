//! Compiled-in defaults. Every value can be overridden through the
//! matching `CQD_*` environment variable (see `from_env` on each config).

use cqdispatch_core::constants;

/// Executor worker threads
pub const NUM_WORKERS: usize = constants::DEFAULT_WORKERS;

/// Executor hand-off queue capacity
pub const EXECUTOR_QUEUE_CAPACITY: usize = constants::DEFAULT_QUEUE_CAPACITY;

/// Hybrid poll-executor submission queue capacity
pub const HYBRID_QUEUE_CAPACITY: usize = constants::DEFAULT_QUEUE_CAPACITY;

/// Completions requested per poll call
pub const POLL_BATCH_SIZE: usize = constants::DEFAULT_POLL_BATCH;

/// Idle rounds spent spinning before yielding
pub const IDLE_SPINS: u32 = 64;

/// Idle rounds spent yielding before sleeping
pub const IDLE_YIELDS: u32 = 32;

/// Executor worker sleep once idle (microseconds)
pub const IDLE_SLEEP_US: u64 = 100;

/// Name prefix of executor worker threads
pub const WORKER_THREAD_NAME: &str = "cqd-worker";

/// Polling thread name
pub const POLLER_THREAD_NAME: &str = "cqd-poller";

/// Hybrid poll-executor thread name
pub const HYBRID_THREAD_NAME: &str = "cqd-hybrid";
