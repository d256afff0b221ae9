//! # HybridPollExecutor
//!
//! One thread that is both poller and executor. Each pass it:
//!
//! 1. Polls the receive queues and resumes what completed
//! 2. Polls the send queues, draining per the [`DrainPolicy`](crate::DrainPolicy)
//! 3. If listening, resumes tokens other threads submitted to it
//!
//! Before the connect signal only steps 1 and 2 run (send queues first), all
//! inline. Listening is off until [`enable_listening`](HybridPollExecutor::enable_listening),
//! so submitted tokens wait in the queue until the owner is ready to have
//! them resumed on this thread.
//!
//! On exit the queue is closed and whatever it still holds is resumed,
//! whether or not listening was enabled, so no accepted token is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cqdispatch_core::{
    cqd_debug, cqd_error, cqd_info, cqd_warn, CompletionQueue, DispatchError, DispatchResult,
    OpToken, PushError, TransportError,
};

use crate::affinity::pin_current_thread;
use crate::arena::OperationArena;
use crate::backoff::BackoffPolicy;
use crate::config::HybridConfig;
use crate::dispatch::{DispatchMode, Dispatcher, DrainPolicy, PassError, PollCounters, PollStats, Pump};
use crate::poller::{ConnectSignal, Lifecycle, PollerState};
use crate::queue::BoundedQueue;

/// How a blocked `submit` waits for queue space: spin, then yield forever.
const SUBMIT_BACKOFF: BackoffPolicy = BackoffPolicy::new(64, u32::MAX, Duration::ZERO);

struct HybridShared {
    queue: BoundedQueue<OpToken>,
    listening: AtomicBool,
    life: Lifecycle,
}

struct HybridLoop {
    name: String,
    send_cqs: Vec<Arc<dyn CompletionQueue>>,
    recv_cqs: Vec<Arc<dyn CompletionQueue>>,
    pump: Pump,
    drain: DrainPolicy,
    idle: BackoffPolicy,
    cpu: Option<usize>,
    shared: Arc<HybridShared>,
}

impl HybridLoop {
    fn run(mut self) {
        if let Some(cpu) = self.cpu {
            if let Err(e) = pin_current_thread(cpu) {
                cqd_warn!("{}: cannot pin to cpu {}: {}", self.name, cpu, e);
            }
        }

        cqd_info!(
            "{}: connecting, {} send / {} recv queue(s)",
            self.name,
            self.send_cqs.len(),
            self.recv_cqs.len()
        );
        let result = match self.connect_phase() {
            Ok(true) => self.running_phase(),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(PassError::Transport(e)) = result {
            cqd_error!("{}: transport failure, stopping: {}", self.name, e);
            self.shared.life.fail(e);
        }

        // Close first so the drain below sees every accepted token
        self.shared.queue.close();
        let left = self.resume_submitted(usize::MAX);
        if left > 0 {
            cqd_debug!("{}: resumed {} queued token(s) on exit", self.name, left);
        }
        self.shared.life.set_state(PollerState::Stopped);
        cqd_info!("{}: stopped", self.name);
    }

    fn connect_phase(&mut self) -> Result<bool, PassError> {
        let mut idle = self.idle.backoff();
        while !self.shared.life.connected().is_set() {
            if self.shared.life.should_stop() {
                return Ok(false);
            }
            let seen = self.pump.pass(&self.send_cqs, None, &DispatchMode::Inline)?
                + self.pump.pass(&self.recv_cqs, None, &DispatchMode::Inline)?;
            if seen == 0 {
                idle.snooze();
            } else {
                idle.reset();
            }
        }
        Ok(true)
    }

    fn running_phase(&mut self) -> Result<(), PassError> {
        self.shared.life.set_state(PollerState::Running);
        cqd_info!("{}: running", self.name);

        let budget = self.shared.queue.capacity();
        let mut idle = self.idle.backoff();
        while !self.shared.life.should_stop() {
            let mut seen = self.pump.pass(&self.recv_cqs, None, &DispatchMode::Inline)?;
            seen += self
                .pump
                .pass(&self.send_cqs, Some(&self.drain), &DispatchMode::Inline)?;
            if self.shared.listening.load(Ordering::Acquire) {
                seen += self.resume_submitted(budget);
            }

            if seen == 0 {
                idle.snooze();
            } else {
                idle.reset();
            }
        }
        Ok(())
    }

    /// Resume up to `max` submitted tokens on this thread
    fn resume_submitted(&self, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.shared.queue.pop() {
                Some(token) => {
                    self.pump.resume_inline(token);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

/// Handle to a hybrid polling/executing thread. Dropping it stops and joins
/// the thread.
pub struct HybridPollExecutor {
    name: String,
    shared: Arc<HybridShared>,
    counters: Arc<PollCounters>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HybridPollExecutor {
    pub fn new(
        send_cqs: Vec<Arc<dyn CompletionQueue>>,
        recv_cqs: Vec<Arc<dyn CompletionQueue>>,
        arena: Arc<OperationArena>,
        config: HybridConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;

        let shared = Arc::new(HybridShared {
            queue: BoundedQueue::new(config.queue_capacity)?,
            listening: AtomicBool::new(config.listening),
            life: Lifecycle::new(config.connect_signal.unwrap_or_default()),
        });
        let counters = Arc::new(PollCounters::default());

        let hybrid_loop = HybridLoop {
            name: config.name.clone(),
            send_cqs,
            recv_cqs,
            pump: Pump::new(arena, config.batch_size, Arc::clone(&counters)),
            drain: config.drain,
            idle: config.idle,
            cpu: config.cpu,
            shared: Arc::clone(&shared),
        };

        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || hybrid_loop.run())
            .map_err(|e| {
                cqd_error!("{}: failed to spawn thread: {}", config.name, e);
                DispatchError::Spawn
            })?;

        Ok(Self {
            name: config.name,
            shared,
            counters,
            thread: Some(thread),
        })
    }

    /// Queue a Ready token for resumption on this thread, waiting while the
    /// queue is full. Tokens are only consumed while listening (or on exit),
    /// so a full queue with listening off blocks until either changes.
    pub fn submit(&self, token: OpToken) -> DispatchResult<()> {
        let mut backoff = SUBMIT_BACKOFF.backoff();
        let mut token = token;
        loop {
            match self.shared.queue.push(token) {
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
        self.shared.queue.push(token).map_err(DispatchError::from)
    }

    /// Start resuming submitted tokens. Idempotent.
    pub fn enable_listening(&self) {
        self.shared.listening.store(true, Ordering::Release);
    }

    /// Stop resuming submitted tokens; they stay queued. Idempotent.
    pub fn disable_listening(&self) {
        self.shared.listening.store(false, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    pub fn connect_done(&self) {
        self.shared.life.connected().set();
    }

    pub fn connect_signal(&self) -> ConnectSignal {
        self.shared.life.connected().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PollerState {
        self.shared.life.state()
    }

    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.life.last_error()
    }

    /// Tokens submitted and not yet resumed
    pub fn queued(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn stats(&self) -> PollStats {
        self.counters.snapshot()
    }

    /// Ask the thread to stop after its current pass. Does not wait.
    pub fn stop(&self) {
        self.shared.life.request_stop();
    }

    /// Stop, resume what is still queued, and wait for the thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.life.request_stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                cqd_error!("{}: thread panicked", self.name);
                self.shared.queue.close();
                self.shared.life.set_state(PollerState::Stopped);
            }
        }
    }
}

impl Dispatcher for HybridPollExecutor {
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

impl Drop for HybridPollExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HybridPollExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridPollExecutor")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("listening", &self.is_listening())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackCq;
    use cqdispatch_core::{CompletionEvent, Opcode, SpinLock};
    use std::time::Instant;

    fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        f()
    }

    fn ready(arena: &OperationArena, seen: &Arc<SpinLock<Vec<u32>>>, id: u32) -> OpToken {
        let seen = Arc::clone(seen);
        let token = arena.register_callback(move |_| seen.lock().push(id)).unwrap();
        arena
            .deliver(&CompletionEvent::new(token, Opcode::Recv, 0))
            .unwrap()
    }

    fn config(name: &str) -> HybridConfig {
        HybridConfig::new()
            .name(name)
            .queue_capacity(16)
            .idle(BackoffPolicy::new(16, 16, Duration::from_micros(100)))
    }

    #[test]
    fn test_submitted_tokens_wait_for_listening() {
        let arena = Arc::new(OperationArena::new(32).unwrap());
        let seen = Arc::new(SpinLock::new(Vec::new()));
        let hybrid = HybridPollExecutor::new(vec![], vec![], Arc::clone(&arena), config("h-listen")).unwrap();
        hybrid.connect_done();
        assert!(wait_for(Duration::from_secs(5), || hybrid.state() == PollerState::Running));

        hybrid.submit(ready(&arena, &seen, 1)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().is_empty());
        assert_eq!(hybrid.queued(), 1);

        hybrid.enable_listening();
        assert!(wait_for(Duration::from_secs(5), || seen.lock().len() == 1));
        assert_eq!(hybrid.queued(), 0);
    }

    #[test]
    fn test_exit_resumes_queued_tokens() {
        let arena = Arc::new(OperationArena::new(32).unwrap());
        let seen = Arc::new(SpinLock::new(Vec::new()));
        let mut hybrid = HybridPollExecutor::new(vec![], vec![], Arc::clone(&arena), config("h-exit")).unwrap();

        for id in 0..5 {
            hybrid.submit(ready(&arena, &seen, id)).unwrap();
        }
        hybrid.shutdown();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(hybrid.state(), PollerState::Stopped);
        assert_eq!(hybrid.submit(ready(&arena, &seen, 9)), Err(DispatchError::QueueClosed));
    }

    #[test]
    fn test_polls_recv_and_drains_send() {
        let arena = Arc::new(OperationArena::new(32).unwrap());
        let send = LoopbackCq::new("send");
        let recv = LoopbackCq::new("recv");
        let hybrid = HybridPollExecutor::new(
            vec![send.clone()],
            vec![recv.clone()],
            Arc::clone(&arena),
            config("h-poll"),
        )
        .unwrap();
        hybrid.connect_done();

        let seen = Arc::new(SpinLock::new(Vec::new()));
        let s = Arc::clone(&seen);
        let token = arena.register_callback(move |ev| s.lock().push(ev.byte_len)).unwrap();
        send.push(CompletionEvent::new(OpToken::NONE, Opcode::Send, 1));
        recv.push(CompletionEvent::new(token, Opcode::Recv, 64));

        assert!(wait_for(Duration::from_secs(5), || seen.lock().len() == 1));
        assert!(wait_for(Duration::from_secs(5), || hybrid.stats().drained == 1));
        assert_eq!(*seen.lock(), vec![64]);
    }
}
