//! `Executor`: fixed pool of resumption workers.
//!
//! Spawns N OS threads at creation. Pollers push Ready tokens into a
//! bounded MPMC queue; workers pop them and resume the operation through
//! the arena. No dynamic scaling.
//!
//! Shutdown closes the queue. Workers keep draining until the queue is
//! both closed and empty, so every token accepted before the close is
//! resumed before `join` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cqdispatch_core::{cqd_debug, cqd_error, cqd_info, cqd_warn, DispatchError, DispatchResult, OpToken, PushError};

use crate::affinity::pin_current_thread;
use crate::arena::{OperationArena, Resumed};
use crate::backoff::BackoffPolicy;
use crate::config::ExecutorConfig;
use crate::dispatch::Dispatcher;
use crate::queue::BoundedQueue;

/// How a blocked `submit` waits for queue space: spin, then yield forever.
const SUBMIT_BACKOFF: BackoffPolicy = BackoffPolicy::new(64, u32::MAX, Duration::ZERO);

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Continuations that ran to completion
    pub resumed: u64,
    /// Continuations that panicked
    pub panicked: u64,
    /// Tokens that named no Ready operation
    pub rejected: u64,
    /// Tokens waiting in the queue right now
    pub queued: usize,
}

/// Shared state between the handle and the workers.
struct ExecutorInner {
    queue: BoundedQueue<OpToken>,
    arena: Arc<OperationArena>,
    idle: BackoffPolicy,
    resumed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
}

impl ExecutorInner {
    fn resume(&self, token: OpToken) {
        match self.arena.resume(token) {
            Ok(Resumed::Completed) => {
                self.resumed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Resumed::Panicked) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                cqd_warn!("executor: cannot resume {}: {}", token, e);
            }
        }
    }
}

pub struct Executor {
    inner: Arc<ExecutorInner>,
    workers: Vec<thread::JoinHandle<()>>,
    name: String,
}

impl Executor {
    /// Validate `config`, create the queue and start the workers.
    pub fn new(arena: Arc<OperationArena>, config: ExecutorConfig) -> DispatchResult<Self> {
        config.validate()?;

        let inner = Arc::new(ExecutorInner {
            queue: BoundedQueue::new(config.queue_capacity)?,
            arena,
            idle: config.idle,
            resumed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let cpu = match config.cpus.len() {
                0 => None,
                n => Some(config.cpus[worker_id % n]),
            };
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id, cpu));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    cqd_error!("executor: failed to spawn worker {}: {}", worker_id, e);
                    inner.queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(DispatchError::Spawn);
                }
            }
        }

        cqd_info!(
            "executor '{}' started: {} workers, queue capacity {}",
            config.thread_name,
            config.num_workers,
            config.queue_capacity
        );
        Ok(Self {
            inner,
            workers,
            name: config.thread_name,
        })
    }

    /// Hand a Ready token to the workers, waiting while the queue is full.
    ///
    /// Returns `QueueClosed` once shutdown has begun; the token is then
    /// not resumed by this executor.
    pub fn submit(&self, token: OpToken) -> DispatchResult<()> {
        let mut backoff = SUBMIT_BACKOFF.backoff();
        let mut token = token;
        loop {
            match self.inner.queue.push(token) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(t)) => {
                    token = t;
                    backoff.snooze();
                }
                Err(PushError::Closed(_)) => return Err(DispatchError::QueueClosed),
            }
        }
    }

    /// Non-blocking submit: `CapacityExceeded` when the queue is full.
    pub fn try_submit(&self, token: OpToken) -> DispatchResult<()> {
        self.inner.queue.push(token).map_err(DispatchError::from)
    }

    /// Stop accepting tokens. Workers finish what is queued, then exit.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.inner.queue.close() {
            cqd_debug!("executor '{}': shutdown, {} tokens left", self.name, self.inner.queue.size());
        }
    }

    /// Shut down and wait for every worker to exit.
    pub fn join(&mut self) {
        self.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                cqd_error!("executor '{}': worker thread panicked", self.name);
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_closed()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn arena(&self) -> &Arc<OperationArena> {
        &self.inner.arena
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            resumed: self.inner.resumed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            queued: self.inner.queue.size(),
        }
    }
}

impl Dispatcher for Executor {
    fn dispatch(&self, token: OpToken) -> DispatchResult<()> {
        self.submit(token)
    }

    fn try_dispatch(&self, token: OpToken) -> DispatchResult<()> {
        self.try_submit(token)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<ExecutorInner>, worker_id: usize, cpu: Option<usize>) {
    if let Some(cpu) = cpu {
        if let Err(e) = pin_current_thread(cpu) {
            cqd_warn!("worker {}: cannot pin to cpu {}: {}", worker_id, cpu, e);
        }
    }

    let mut idle = inner.idle.backoff();
    loop {
        // Read the flag before popping: closed and then empty means drained
        let closed = inner.queue.is_closed();
        match inner.queue.pop() {
            Some(token) => {
                idle.reset();
                inner.resume(token);
            }
            None if closed => break,
            None => idle.snooze(),
        }
    }
    cqd_debug!("worker {} exiting", worker_id);
}
