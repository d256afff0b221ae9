//! Dispatch policy and the shared poll pass.
//!
//! Every polling loop in this crate does the same thing per pass: poll
//! each completion queue once, then route each event. Routing is one of:
//!
//! - **drain**: discard. Used for events nobody waits on.
//! - **inline**: deliver to the arena and resume on the polling thread.
//! - **queued**: deliver to the arena and hand the token to a [`Dispatcher`].
//!
//! The loops differ only in which queues they poll and which routing they
//! pick, so the pass itself lives here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cqdispatch_core::{
    cqd_trace, cqd_warn, CompletionEvent, CompletionQueue, DispatchError, DispatchResult, OpToken,
    Opcode, TransportError,
};

use crate::arena::{OperationArena, Resumed};
use crate::backoff::BackoffPolicy;
use crate::poller::Lifecycle;

/// Retry pacing while a dispatcher is full. The sleep step bounds how long a
/// stop request waits to be noticed.
const HANDOFF_BACKOFF: BackoffPolicy = BackoffPolicy::new(64, 16, Duration::from_micros(50));

/// Accepts Ready operations for resumption on some other thread.
///
/// # Implementors
///
/// - [`Executor`](crate::Executor): pool of worker threads behind a bounded
///   queue.
/// - [`HybridPollExecutor`](crate::HybridPollExecutor): resumes on its own
///   polling thread while listening.
///
/// **Contract:**
/// - `dispatch()` applies back-pressure rather than dropping: while the
///   target is open it returns only once the token is accepted.
/// - `try_dispatch()` makes one attempt and returns `CapacityExceeded` when
///   the target is full. Pollers retry it between stop checks, so a
///   dispatcher that only implements `dispatch` can delay shutdown.
/// - After the target is shut down both return `QueueClosed` and the token
///   is not resumed.
/// - An accepted token is resumed exactly once.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, token: OpToken) -> DispatchResult<()>;

    /// Non-blocking hand-off. Defaults to the blocking `dispatch`.
    fn try_dispatch(&self, token: OpToken) -> DispatchResult<()> {
        self.dispatch(token)
    }

    /// Human-readable identity for logs.
    fn name(&self) -> &str {
        "dispatcher"
    }
}

/// Where a poller resumes operations once the connection is up.
#[derive(Clone)]
pub enum DispatchMode {
    /// Resume on the polling thread
    Inline,
    /// Hand tokens to a dispatcher
    Queued(Arc<dyn Dispatcher>),
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Inline => f.write_str("Inline"),
            DispatchMode::Queued(d) => write!(f, "Queued({})", d.name()),
        }
    }
}

/// Which side of the connection a poller serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Receive completions: every event is dispatched.
    #[default]
    Recv,
    /// Send completions: events matching the [`DrainPolicy`] are discarded.
    Send,
}

impl Direction {
    pub const fn name(self) -> &'static str {
        match self {
            Direction::Recv => "recv",
            Direction::Send => "send",
        }
    }
}

/// Which send-side completions are discarded instead of dispatched.
///
/// Events without a token are always drained: nothing can be waiting on
/// them. Opcodes listed here are drained as well, for senders that post
/// fire-and-forget requests with a token anyway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainPolicy {
    opcodes: Vec<Opcode>,
}

impl DrainPolicy {
    /// Drain only tokenless events
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_opcode(mut self, opcode: Opcode) -> Self {
        if !self.opcodes.contains(&opcode) {
            self.opcodes.push(opcode);
        }
        self
    }

    /// Parse a comma-separated opcode list; unknown names are skipped.
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|name| {
                let op = Opcode::parse(name);
                if op.is_none() {
                    cqd_warn!("ignoring unknown opcode '{}' in drain list", name.trim());
                }
                op
            })
            .fold(Self::new(), Self::with_opcode)
    }

    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    #[inline]
    pub fn should_drain(&self, event: &CompletionEvent) -> bool {
        event.token.is_none() || self.opcodes.contains(&event.opcode)
    }
}

/// Counters shared between a polling thread and its handle.
#[derive(Debug, Default)]
pub(crate) struct PollCounters {
    polled: AtomicU64,
    resumed: AtomicU64,
    dispatched: AtomicU64,
    drained: AtomicU64,
    stale: AtomicU64,
    panicked: AtomicU64,
    passes: AtomicU64,
}

impl PollCounters {
    pub(crate) fn note_resumed(&self, outcome: Resumed) {
        match outcome {
            Resumed::Completed => self.resumed.fetch_add(1, Ordering::Relaxed),
            Resumed::Panicked => self.panicked.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn snapshot(&self) -> PollStats {
        PollStats {
            polled: self.polled.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of a polling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Completion events returned by `poll`
    pub polled: u64,
    /// Continuations resumed on the polling thread
    pub resumed: u64,
    /// Tokens handed to a dispatcher
    pub dispatched: u64,
    /// Events discarded without dispatch
    pub drained: u64,
    /// Events whose token named no pending operation
    pub stale: u64,
    /// Inline continuations that panicked
    pub panicked: u64,
    /// Poll passes over all queues
    pub passes: u64,
}

/// Why a pass stopped the loop that ran it.
#[derive(Debug)]
pub(crate) enum PassError {
    Transport(TransportError),
    DispatcherClosed,
}

/// Poll buffer plus the routing logic of one polling thread.
pub(crate) struct Pump {
    arena: Arc<OperationArena>,
    buf: Vec<CompletionEvent>,
    counters: Arc<PollCounters>,
    life: Option<Arc<Lifecycle>>,
}

impl Pump {
    pub(crate) fn new(arena: Arc<OperationArena>, batch_size: usize, counters: Arc<PollCounters>) -> Self {
        Self {
            arena,
            buf: vec![CompletionEvent::empty(); batch_size.max(1)],
            counters,
            life: None,
        }
    }

    /// Give up waiting on a full dispatcher once `life` is asked to stop.
    pub(crate) fn stop_on(mut self, life: Arc<Lifecycle>) -> Self {
        self.life = Some(life);
        self
    }

    fn stopping(&self) -> bool {
        self.life.as_ref().is_some_and(|l| l.should_stop())
    }

    /// Poll every queue once and route what came back, in order.
    ///
    /// Returns the number of events seen. A transport error aborts the pass
    /// immediately; events already routed stay routed.
    pub(crate) fn pass(
        &mut self,
        cqs: &[Arc<dyn CompletionQueue>],
        drain: Option<&DrainPolicy>,
        mode: &DispatchMode,
    ) -> Result<usize, PassError> {
        self.counters.passes.fetch_add(1, Ordering::Relaxed);

        let mut seen = 0;
        for cq in cqs {
            let n = cq.poll(&mut self.buf).map_err(PassError::Transport)?;
            let n = n.min(self.buf.len());
            if n == 0 {
                continue;
            }
            self.counters.polled.fetch_add(n as u64, Ordering::Relaxed);

            for i in 0..n {
                let event = self.buf[i];
                self.route(cq.name(), &event, drain, mode)?;
            }
            seen += n;
        }
        Ok(seen)
    }

    fn route(
        &self,
        cq: &str,
        event: &CompletionEvent,
        drain: Option<&DrainPolicy>,
        mode: &DispatchMode,
    ) -> Result<(), PassError> {
        let drained = match drain {
            Some(policy) => policy.should_drain(event),
            None => event.token.is_none(),
        };
        if drained {
            self.counters.drained.fetch_add(1, Ordering::Relaxed);
            cqd_trace!("{}: drained {} ({})", cq, event.token, event.opcode);
            return Ok(());
        }

        let token = match self.arena.deliver(event) {
            Ok(token) => token,
            Err(e) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                cqd_warn!("{}: dropping {} completion: {}", cq, event.opcode, e);
                return Ok(());
            }
        };

        match mode {
            DispatchMode::Inline => self.resume_inline(token),
            DispatchMode::Queued(dispatcher) => self.hand_off(cq, dispatcher.as_ref(), token)?,
        }
        Ok(())
    }

    /// Retry `try_dispatch` while the dispatcher is full, until it accepts
    /// or the owning loop is stopping.
    fn hand_off(&self, cq: &str, dispatcher: &dyn Dispatcher, token: OpToken) -> Result<(), PassError> {
        let mut backoff = HANDOFF_BACKOFF.backoff();
        loop {
            match dispatcher.try_dispatch(token) {
                Ok(()) => {
                    self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(DispatchError::QueueClosed) => return Err(PassError::DispatcherClosed),
                Err(DispatchError::CapacityExceeded) if !self.stopping() => backoff.snooze(),
                Err(e) => {
                    // Token is Ready; resuming here keeps it from being lost
                    cqd_warn!("{}: {} rejected {}: {}, resuming inline", cq, dispatcher.name(), token, e);
                    self.resume_inline(token);
                    return Ok(());
                }
            }
        }
    }

    pub(crate) fn resume_inline(&self, token: OpToken) {
        match self.arena.resume(token) {
            Ok(outcome) => self.counters.note_resumed(outcome),
            Err(e) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                cqd_warn!("resume {} failed: {}", token, e);
            }
        }
    }
}
