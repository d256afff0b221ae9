//! # Operation arena
//!
//! Owns every in-flight asynchronous operation. Posting a work request
//! registers a continuation and gets back an [`OpToken`]; the token rides
//! through the transport as the request's opaque context and comes back on
//! the completion event.
//!
//! ```text
//!   register ──► Pending ──deliver(event)──► Ready ──resume──► Vacant
//!                   │                                          (gen + 1)
//!                   └────────────cancel────────────────────────────┘
//! ```
//!
//! - `deliver` attaches the completion to the slot. It runs on the polling
//!   thread.
//! - `resume` consumes the slot and runs the continuation exactly once. It
//!   runs on whichever thread the dispatch policy picks.
//!
//! Every transition checks the token's generation, so a stale or duplicate
//! token is rejected instead of resuming whatever reuses the slot.
//!
//! Slot ids come from a lock-free free list, falling back to never-used ids
//! (same scheme as the scheduler's slot allocator: recycled first, fresh
//! after).

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use cqdispatch_core::{
    cqd_error, cqd_trace, CompletionEvent, DispatchError, DispatchResult, OpToken, SpinLock,
    Transport, TransportError, WorkRequest,
};

/// What to run when an operation completes.
pub struct Continuation(Kind);

enum Kind {
    Callback(Box<dyn FnOnce(CompletionEvent) + Send + 'static>),
    Promise(Arc<OpCell>),
}

impl Continuation {
    /// Run `f` with the completion event
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(CompletionEvent) + Send + 'static,
    {
        Continuation(Kind::Callback(Box::new(f)))
    }

    fn run(self, event: CompletionEvent) {
        match self.0 {
            Kind::Callback(f) => f(event),
            Kind::Promise(cell) => cell.fulfil(event),
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Kind::Callback(_) => f.write_str("Continuation::Callback"),
            Kind::Promise(_) => f.write_str("Continuation::Promise"),
        }
    }
}

/// How a resumed continuation finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumed {
    Completed,
    /// The continuation panicked; the panic was caught and logged
    Panicked,
}

enum SlotState {
    Vacant,
    Pending(Continuation),
    Ready(Continuation, CompletionEvent),
}

struct SlotEntry {
    generation: u32,
    state: SlotState,
}

/// Generation-checked table of in-flight operations.
pub struct OperationArena {
    slots: Box<[SpinLock<SlotEntry>]>,
    /// Recycled slot ids
    free: ArrayQueue<u32>,
    /// Next never-used slot id
    next_fresh: AtomicU32,
    in_flight: AtomicUsize,
}

impl OperationArena {
    /// Arena holding at most `capacity` simultaneously in-flight operations.
    pub fn new(capacity: usize) -> DispatchResult<Self> {
        if capacity == 0 || capacity >= u32::MAX as usize {
            return Err(DispatchError::InvalidCapacity);
        }

        let slots = (0..capacity)
            .map(|_| {
                SpinLock::new(SlotEntry {
                    generation: 0,
                    state: SlotState::Vacant,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            free: ArrayQueue::new(capacity),
            next_fresh: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Operations registered and not yet resumed or cancelled
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn allocate(&self) -> DispatchResult<u32> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }

        let max = self.slots.len() as u32;
        let mut current = self.next_fresh.load(Ordering::Acquire);
        loop {
            if current >= max {
                // A concurrent release may have refilled the free list
                return self.free.pop().ok_or(DispatchError::NoSlotsAvailable);
            }
            match self.next_fresh.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    fn entry(&self, token: OpToken) -> DispatchResult<&SpinLock<SlotEntry>> {
        if token.is_none() {
            return Err(DispatchError::StaleToken(token));
        }
        self.slots
            .get(token.index() as usize)
            .ok_or(DispatchError::StaleToken(token))
    }

    /// Vacate a slot under its lock; the caller pushes the id afterwards.
    fn vacate(entry: &mut SlotEntry) {
        entry.generation = entry.generation.wrapping_add(1);
        entry.state = SlotState::Vacant;
    }

    fn recycle(&self, index: u32) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        // Cannot overflow: ids in circulation never exceed capacity
        let pushed = self.free.push(index);
        debug_assert!(pushed.is_ok(), "free list overflow");
    }

    /// Register a continuation and return the token that names it.
    pub fn register(&self, continuation: Continuation) -> DispatchResult<OpToken> {
        let index = self.allocate()?;
        let mut entry = self.slots[index as usize].lock();
        debug_assert!(matches!(entry.state, SlotState::Vacant));
        entry.state = SlotState::Pending(continuation);
        let token = OpToken::new(index, entry.generation);
        drop(entry);

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(token)
    }

    pub fn register_callback<F>(&self, f: F) -> DispatchResult<OpToken>
    where
        F: FnOnce(CompletionEvent) + Send + 'static,
    {
        self.register(Continuation::callback(f))
    }

    /// Register an operation whose result is collected through a [`PendingOp`].
    pub fn register_pending(&self) -> DispatchResult<PendingOp> {
        let cell = Arc::new(OpCell::new());
        let token = self.register(Continuation(Kind::Promise(Arc::clone(&cell))))?;
        Ok(PendingOp { token, cell })
    }

    /// Attach a completion to its operation (Pending → Ready).
    ///
    /// Returns the token to hand to a dispatcher. Stale, duplicate and
    /// foreign tokens yield `StaleToken` and leave the arena untouched.
    pub fn deliver(&self, event: &CompletionEvent) -> DispatchResult<OpToken> {
        let token = event.token;
        let mut entry = self.entry(token)?.lock();
        if entry.generation != token.generation() {
            return Err(DispatchError::StaleToken(token));
        }

        match std::mem::replace(&mut entry.state, SlotState::Vacant) {
            SlotState::Pending(continuation) => {
                entry.state = SlotState::Ready(continuation, *event);
                Ok(token)
            }
            other => {
                entry.state = other;
                Err(DispatchError::StaleToken(token))
            }
        }
    }

    /// Run the continuation of a Ready operation, exactly once.
    ///
    /// The slot is vacated before the continuation runs, so a continuation
    /// may immediately post a new operation into the same arena. A panic in
    /// the continuation is caught, logged and reported as `Resumed::Panicked`.
    pub fn resume(&self, token: OpToken) -> DispatchResult<Resumed> {
        let slot = self.entry(token)?;
        let mut entry = slot.lock();
        if entry.generation != token.generation() {
            return Err(DispatchError::StaleToken(token));
        }

        let (continuation, event) = match std::mem::replace(&mut entry.state, SlotState::Vacant) {
            SlotState::Ready(continuation, event) => (continuation, event),
            other => {
                entry.state = other;
                return Err(DispatchError::InvalidState);
            }
        };
        Self::vacate(&mut entry);
        drop(entry);
        self.recycle(token.index());

        cqd_trace!("resume {} ({}, {} bytes)", token, event.opcode, event.byte_len);
        match panic::catch_unwind(AssertUnwindSafe(|| continuation.run(event))) {
            Ok(()) => Ok(Resumed::Completed),
            Err(payload) => {
                cqd_error!("continuation for {} panicked: {}", token, panic_message(&payload));
                Ok(Resumed::Panicked)
            }
        }
    }

    /// `deliver` followed by `resume` on the calling thread
    pub fn complete(&self, event: &CompletionEvent) -> DispatchResult<Resumed> {
        let token = self.deliver(event)?;
        self.resume(token)
    }

    /// Abandon a Pending operation. Its continuation is dropped without
    /// running; a [`PendingOp`] for it never completes.
    pub fn cancel(&self, token: OpToken) -> DispatchResult<()> {
        let mut entry = self.entry(token)?.lock();
        if entry.generation != token.generation() {
            return Err(DispatchError::StaleToken(token));
        }
        if !matches!(entry.state, SlotState::Pending(_)) {
            return Err(DispatchError::InvalidState);
        }
        let state = std::mem::replace(&mut entry.state, SlotState::Vacant);
        Self::vacate(&mut entry);
        drop(entry);
        self.recycle(token.index());

        // Continuation captures are dropped outside the slot lock
        drop(state);
        Ok(())
    }

    /// Whether `token` names an operation still waiting for its completion
    pub fn is_pending(&self, token: OpToken) -> bool {
        match self.entry(token) {
            Ok(slot) => {
                let entry = slot.lock();
                entry.generation == token.generation()
                    && matches!(entry.state, SlotState::Pending(_))
            }
            Err(_) => false,
        }
    }

    /// Register, stamp the request with the token and post it.
    ///
    /// The request must be signaled: an unsignaled request produces no
    /// completion and would never resolve. If the transport rejects the
    /// post the registration is cancelled.
    pub fn post<T>(&self, transport: &T, req: WorkRequest) -> DispatchResult<PendingOp>
    where
        T: Transport + ?Sized,
    {
        if !req.signaled {
            return Err(TransportError::InvalidRequest("unsignaled request never completes").into());
        }
        let op = self.register_pending()?;
        self.post_registered(transport, req, op.token)?;
        Ok(op)
    }

    /// Like [`post`](Self::post), resuming `f` instead of a [`PendingOp`].
    pub fn post_with<T, F>(&self, transport: &T, req: WorkRequest, f: F) -> DispatchResult<OpToken>
    where
        T: Transport + ?Sized,
        F: FnOnce(CompletionEvent) + Send + 'static,
    {
        if !req.signaled {
            return Err(TransportError::InvalidRequest("unsignaled request never completes").into());
        }
        let token = self.register_callback(f)?;
        self.post_registered(transport, req, token)?;
        Ok(token)
    }

    fn post_registered<T>(&self, transport: &T, req: WorkRequest, token: OpToken) -> DispatchResult<()>
    where
        T: Transport + ?Sized,
    {
        if let Err(e) = transport.post(req.with_token(token)) {
            let _ = self.cancel(token);
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for OperationArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationArena")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

// ============================================================================
// PendingOp
// ============================================================================

struct OpCell {
    state: SpinLock<CellState>,
}

#[derive(Default)]
struct CellState {
    event: Option<CompletionEvent>,
    waker: Option<Waker>,
    /// Threads parked in `wait` / `wait_timeout`
    waiters: Vec<Thread>,
}

impl CellState {
    fn park_me(&mut self) {
        let me = thread::current();
        if !self.waiters.iter().any(|t| t.id() == me.id()) {
            self.waiters.push(me);
        }
    }

    fn forget_me(&mut self) {
        let id = thread::current().id();
        self.waiters.retain(|t| t.id() != id);
    }
}

impl OpCell {
    fn new() -> Self {
        Self {
            state: SpinLock::new(CellState::default()),
        }
    }

    fn fulfil(&self, event: CompletionEvent) {
        let (waker, waiters) = {
            let mut st = self.state.lock();
            st.event = Some(event);
            (st.waker.take(), std::mem::take(&mut st.waiters))
        };
        if let Some(w) = waker {
            w.wake();
        }
        for t in waiters {
            t.unpark();
        }
    }
}

/// Handle to an operation's eventual completion.
///
/// Block on it with [`wait`](Self::wait) / [`wait_timeout`](Self::wait_timeout),
/// or `.await` it from any async runtime.
pub struct PendingOp {
    token: OpToken,
    cell: Arc<OpCell>,
}

impl PendingOp {
    #[inline]
    pub fn token(&self) -> OpToken {
        self.token
    }

    pub fn is_complete(&self) -> bool {
        self.cell.state.lock().event.is_some()
    }

    /// The completion, if it has arrived
    pub fn try_result(&self) -> Option<CompletionEvent> {
        self.cell.state.lock().event
    }

    /// Park the calling thread until the completion arrives. Any number of
    /// threads may wait on the same handle.
    pub fn wait(&self) -> CompletionEvent {
        loop {
            {
                let mut st = self.cell.state.lock();
                if let Some(event) = st.event {
                    return event;
                }
                st.park_me();
            }
            thread::park();
        }
    }

    /// Wait at most `timeout`. On `Timeout` the operation stays in flight
    /// and can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> DispatchResult<CompletionEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = {
                let mut st = self.cell.state.lock();
                if let Some(event) = st.event {
                    return Ok(event);
                }
                let now = Instant::now();
                if now >= deadline {
                    st.forget_me();
                    return Err(DispatchError::Timeout);
                }
                st.park_me();
                deadline - now
            };
            thread::park_timeout(left);
        }
    }
}

impl Future for PendingOp {
    type Output = CompletionEvent;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CompletionEvent> {
        let mut st = self.cell.state.lock();
        if let Some(event) = st.event {
            return Poll::Ready(event);
        }
        match &st.waker {
            Some(w) if w.will_wake(cx.waker()) => {}
            _ => st.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOp")
            .field("token", &self.token)
            .field("complete", &self.is_complete())
            .finish()
    }
}
