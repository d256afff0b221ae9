//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cqdispatch_core::{OpToken, SpinLock};
use cqdispatch_runtime::{BackoffPolicy, ExecutorConfig, OperationArena, PollerConfig};

pub const PATIENCE: Duration = Duration::from_secs(10);

/// Poll `f` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    f()
}

/// Low-latency idle policy that still lets CI machines breathe
pub fn test_idle() -> BackoffPolicy {
    BackoffPolicy::new(16, 16, Duration::from_micros(100))
}

pub fn poller_config(name: &str, workers: usize, capacity: usize) -> PollerConfig {
    PollerConfig::new()
        .name(name)
        .idle(test_idle())
        .executor(
            ExecutorConfig::new()
                .num_workers(workers)
                .queue_capacity(capacity)
                .idle(test_idle())
                .thread_name(format!("{}-w", name)),
        )
}

/// Resumption log: (marker, thread name)
pub type Trace = Arc<SpinLock<Vec<(u32, String)>>>;

pub fn trace() -> Trace {
    Arc::new(SpinLock::new(Vec::new()))
}

/// Register an operation that records `marker` and the resuming thread.
pub fn traced_op(arena: &OperationArena, trace: &Trace, marker: u32) -> OpToken {
    let trace = Arc::clone(trace);
    arena
        .register_callback(move |_| {
            let name = thread::current().name().unwrap_or("-").to_string();
            trace.lock().push((marker, name));
        })
        .unwrap()
}
