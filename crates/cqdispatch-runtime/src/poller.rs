//! # Poller: two-phase completion polling thread
//!
//! A poller owns one OS thread that polls a fixed set of completion queues.
//! It runs in two phases:
//!
//! ```text
//!   Connecting ──(connect signal)──► Running ──(stop / transport error)──► Stopped
//!   resume inline                    dispatch per DispatchMode
//! ```
//!
//! While the connection handshake is in flight the handshake itself is
//! waiting on completions, and the executor may not be serving yet, so
//! everything is resumed directly on the polling thread. Once the connect
//! signal is raised the poller switches to its configured dispatch mode.
//! The signal is checked between passes: every event is handled by exactly
//! one phase, none are lost at the boundary.
//!
//! While the dispatcher is full the poller retries the hand-off, checking
//! the stop flag between attempts; once stopping, a token it cannot hand
//! off is resumed on the polling thread. Stop latency therefore never
//! depends on the dispatcher draining.
//!
//! A transport error from any queue stops the poller. The error is kept
//! for [`Poller::last_error`]; the runtime never retries.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use cqdispatch_core::{
    cqd_error, cqd_info, cqd_warn, CompletionQueue, DispatchError, DispatchResult, SpinLock,
    TransportError,
};

use crate::affinity::pin_current_thread;
use crate::arena::OperationArena;
use crate::backoff::BackoffPolicy;
use crate::config::PollerConfig;
use crate::dispatch::{Direction, DispatchMode, Dispatcher, DrainPolicy, PassError, PollCounters, PollStats, Pump};
use crate::executor::Executor;

/// "Connection established" flag shared between the connection manager and
/// one or more pollers.
#[derive(Debug, Clone, Default)]
pub struct ConnectSignal(Arc<AtomicBool>);

impl ConnectSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent; never lowered again.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle phase of a polling thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Handshake in flight; completions resumed inline
    Connecting = 0,
    /// Completions routed per the configured dispatch mode
    Running = 1,
    /// Thread has exited (stop requested, transport error or dispatcher closed)
    Stopped = 2,
}

impl PollerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PollerState::Connecting,
            1 => PollerState::Running,
            _ => PollerState::Stopped,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PollerState::Connecting => "connecting",
            PollerState::Running => "running",
            PollerState::Stopped => "stopped",
        }
    }
}

/// State shared by a polling thread and its handle.
pub(crate) struct Lifecycle {
    stop: AtomicBool,
    connected: ConnectSignal,
    state: AtomicU8,
    last_error: SpinLock<Option<TransportError>>,
}

impl Lifecycle {
    pub(crate) fn new(connected: ConnectSignal) -> Self {
        Self {
            stop: AtomicBool::new(false),
            connected,
            state: AtomicU8::new(PollerState::Connecting as u8),
            last_error: SpinLock::new(None),
        }
    }

    pub(crate) fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PollerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn connected(&self) -> &ConnectSignal {
        &self.connected
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn fail(&self, err: TransportError) {
        *self.last_error.lock() = Some(err);
    }

    pub(crate) fn last_error(&self) -> Option<TransportError> {
        self.last_error.lock().clone()
    }
}

/// Everything the polling thread owns.
struct PollLoop {
    name: String,
    direction: Direction,
    cqs: Vec<Arc<dyn CompletionQueue>>,
    pump: Pump,
    mode: DispatchMode,
    drain: DrainPolicy,
    idle: BackoffPolicy,
    cpu: Option<usize>,
    life: Arc<Lifecycle>,
}

impl PollLoop {
    fn run(mut self) {
        if let Some(cpu) = self.cpu {
            match pin_current_thread(cpu) {
                Ok(()) => cqd_info!("{}: pinned to cpu {}", self.name, cpu),
                Err(e) => cqd_warn!("{}: cannot pin to cpu {}: {}", self.name, cpu, e),
            }
        }

        cqd_info!(
            "{}: connecting, {} {} queue(s)",
            self.name,
            self.cqs.len(),
            self.direction.name()
        );
        let result = match self.connect_phase() {
            Ok(true) => self.running_phase(),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => cqd_info!("{}: stopped", self.name),
            Err(PassError::Transport(e)) => {
                cqd_error!("{}: transport failure, stopping: {}", self.name, e);
                self.life.fail(e);
            }
            Err(PassError::DispatcherClosed) => {
                cqd_info!("{}: dispatcher closed, stopping", self.name);
            }
        }
        self.life.set_state(PollerState::Stopped);
    }

    /// Resume everything inline until connected. `Ok(false)` if stopped first.
    fn connect_phase(&mut self) -> Result<bool, PassError> {
        let mut idle = self.idle.backoff();
        while !self.life.connected().is_set() {
            if self.life.should_stop() {
                return Ok(false);
            }
            match self.pump.pass(&self.cqs, None, &DispatchMode::Inline)? {
                0 => idle.snooze(),
                _ => idle.reset(),
            }
        }
        Ok(true)
    }

    fn running_phase(&mut self) -> Result<(), PassError> {
        self.life.set_state(PollerState::Running);
        cqd_info!("{}: running, dispatch {:?}", self.name, self.mode);

        let drain = match self.direction {
            Direction::Recv => None,
            Direction::Send => Some(&self.drain),
        };
        let mut idle = self.idle.backoff();
        while !self.life.should_stop() {
            match self.pump.pass(&self.cqs, drain, &self.mode)? {
                0 => idle.snooze(),
                _ => idle.reset(),
            }
        }
        Ok(())
    }
}

/// Handle to a polling thread. Dropping it stops and joins the thread.
pub struct Poller {
    name: String,
    direction: Direction,
    life: Arc<Lifecycle>,
    counters: Arc<PollCounters>,
    executor: Option<Arc<Executor>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Poller {
    /// Poll `cqs`, resuming through an executor built from `config.executor`.
    pub fn new(
        cqs: Vec<Arc<dyn CompletionQueue>>,
        arena: Arc<OperationArena>,
        config: PollerConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;
        let executor = Arc::new(Executor::new(Arc::clone(&arena), config.executor.clone())?);
        let mode = DispatchMode::Queued(executor.clone());
        Self::spawn(cqs, arena, mode, Some(executor), config)
    }

    /// Poll `cqs`, handing Ready tokens to an existing dispatcher (e.g. an
    /// executor shared by several pollers).
    pub fn with_dispatcher(
        cqs: Vec<Arc<dyn CompletionQueue>>,
        arena: Arc<OperationArena>,
        dispatcher: Arc<dyn Dispatcher>,
        config: PollerConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;
        Self::spawn(cqs, arena, DispatchMode::Queued(dispatcher), None, config)
    }

    /// Poll `cqs`, resuming on the polling thread in both phases.
    pub fn inline(
        cqs: Vec<Arc<dyn CompletionQueue>>,
        arena: Arc<OperationArena>,
        config: PollerConfig,
    ) -> DispatchResult<Self> {
        config.validate()?;
        Self::spawn(cqs, arena, DispatchMode::Inline, None, config)
    }

    fn spawn(
        cqs: Vec<Arc<dyn CompletionQueue>>,
        arena: Arc<OperationArena>,
        mode: DispatchMode,
        executor: Option<Arc<Executor>>,
        config: PollerConfig,
    ) -> DispatchResult<Self> {
        let signal = config.connect_signal.unwrap_or_default();
        let life = Arc::new(Lifecycle::new(signal));
        let counters = Arc::new(PollCounters::default());

        let poll_loop = PollLoop {
            name: config.name.clone(),
            direction: config.direction,
            cqs,
            pump: Pump::new(arena, config.batch_size, Arc::clone(&counters)).stop_on(Arc::clone(&life)),
            mode,
            drain: config.drain,
            idle: config.idle,
            cpu: config.cpu,
            life: Arc::clone(&life),
        };

        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || poll_loop.run())
            .map_err(|e| {
                cqd_error!("{}: failed to spawn polling thread: {}", config.name, e);
                DispatchError::Spawn
            })?;

        Ok(Self {
            name: config.name,
            direction: config.direction,
            life,
            counters,
            executor,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> PollerState {
        self.life.state()
    }

    /// Raise the connect signal. Shared signals raise every poller using them.
    pub fn connect_done(&self) {
        self.life.connected().set();
    }

    pub fn is_connected(&self) -> bool {
        self.life.connected().is_set()
    }

    /// Signal handle for the connection manager
    pub fn connect_signal(&self) -> ConnectSignal {
        self.life.connected().clone()
    }

    /// The transport error that stopped this poller, if any
    pub fn last_error(&self) -> Option<TransportError> {
        self.life.last_error()
    }

    pub fn stats(&self) -> PollStats {
        self.counters.snapshot()
    }

    /// Executor built by [`Poller::new`]
    pub fn executor(&self) -> Option<&Arc<Executor>> {
        self.executor.as_ref()
    }

    /// Ask the thread to stop after its current pass. Does not wait.
    pub fn stop(&self) {
        self.life.request_stop();
    }

    /// Stop and wait for the polling thread to exit. Idempotent.
    pub fn shutdown(&mut self) {
        self.life.request_stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                cqd_error!("{}: polling thread panicked", self.name);
                self.life.set_state(PollerState::Stopped);
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Thread first: it may still be dispatching into the executor
        self.shutdown();
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::loopback::LoopbackCq;
    use cqdispatch_core::{CompletionEvent, Opcode};
    use std::time::{Duration, Instant};

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

    fn small_config(name: &str) -> PollerConfig {
        PollerConfig::new()
            .name(name)
            .idle(BackoffPolicy::new(16, 16, Duration::from_micros(100)))
            .executor(ExecutorConfig::new().num_workers(2).queue_capacity(8))
    }

    #[test]
    fn test_connect_signal_shared() {
        let signal = ConnectSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_set());
        signal.set();
        signal.set();
        assert!(clone.is_set());
    }

    #[test]
    fn test_starts_connecting_and_switches() {
        let arena = Arc::new(OperationArena::new(16).unwrap());
        let cq = LoopbackCq::new("cq");
        let poller = Poller::new(vec![cq.clone()], arena, small_config("t-switch")).unwrap();

        assert_eq!(poller.state(), PollerState::Connecting);
        poller.connect_done();
        assert!(wait_for(Duration::from_secs(5), || poller.state() == PollerState::Running));
    }

    #[test]
    fn test_transport_error_stops_poller() {
        let arena = Arc::new(OperationArena::new(16).unwrap());
        let cq = LoopbackCq::new("cq");
        let poller = Poller::inline(vec![cq.clone()], arena, small_config("t-fail")).unwrap();

        cq.fail_with(TransportError::Poll(-5));
        assert!(wait_for(Duration::from_secs(5), || poller.state() == PollerState::Stopped));
        assert_eq!(poller.last_error(), Some(TransportError::Poll(-5)));
    }

    #[test]
    fn test_drop_before_connect_returns() {
        let arena = Arc::new(OperationArena::new(16).unwrap());
        let cq = LoopbackCq::new("cq");
        let poller = Poller::new(vec![cq], arena, small_config("t-drop")).unwrap();
        drop(poller);
    }

    #[test]
    fn test_inline_mode_resumes_on_poller_thread() {
        let arena = Arc::new(OperationArena::new(16).unwrap());
        let cq = LoopbackCq::new("cq");
        let poller = Poller::inline(vec![cq.clone()], Arc::clone(&arena), small_config("t-inline")).unwrap();
        poller.connect_done();

        let ran_on = Arc::new(SpinLock::new(String::new()));
        let r = Arc::clone(&ran_on);
        let token = arena
            .register_callback(move |_| {
                *r.lock() = thread::current().name().unwrap_or_default().to_string();
            })
            .unwrap();
        cq.push(CompletionEvent::new(token, Opcode::Recv, 4));

        assert!(wait_for(Duration::from_secs(5), || !ran_on.lock().is_empty()));
        assert_eq!(*ran_on.lock(), "t-inline");
        assert_eq!(poller.stats().resumed, 1);
    }
}
