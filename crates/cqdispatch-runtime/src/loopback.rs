//! In-memory transport for tests and demos.
//!
//! [`LoopbackTransport::pair`] returns two connected endpoints. Each has a
//! send and a receive completion queue. Posting on one side behaves like a
//! reliable-connected queue pair:
//!
//! - `Send` / `RdmaWriteWithImm` consume a receive posted on the peer and
//!   complete it with `Recv` / `RecvRdmaWithImm`. Messages that arrive
//!   before a receive is posted wait for one.
//! - `RdmaWrite` / `RdmaRead` are one-sided and complete locally only.
//! - Signaled requests complete on the local send queue.
//!
//! No bytes move; only lengths and immediates. [`LoopbackCq::push`] injects
//! synthetic completions and [`LoopbackCq::fail_with`] makes polling fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cqdispatch_core::{
    cqd_trace, CompletionEvent, CompletionQueue, Opcode, SpinLock, Transport, TransportError,
    WcStatus, WorkRequest,
};

/// FIFO completion queue with failure injection.
pub struct LoopbackCq {
    name: String,
    events: SpinLock<VecDeque<CompletionEvent>>,
    failure: SpinLock<Option<TransportError>>,
}

impl LoopbackCq {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            events: SpinLock::new(VecDeque::new()),
            failure: SpinLock::new(None),
        })
    }

    /// Append a completion
    pub fn push(&self, event: CompletionEvent) {
        self.events.lock().push_back(event);
    }

    /// Every later `poll` fails with `err`
    pub fn fail_with(&self, err: TransportError) {
        *self.failure.lock() = Some(err);
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompletionQueue for LoopbackCq {
    fn poll(&self, out: &mut [CompletionEvent]) -> Result<usize, TransportError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let mut events = self.events.lock();
        let n = out.len().min(events.len());
        for (slot, event) in out.iter_mut().zip(events.drain(..n)) {
            *slot = event;
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LoopbackCq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackCq")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Default)]
struct Inbox {
    /// Receives posted and not yet consumed
    recvs: VecDeque<WorkRequest>,
    /// Messages that arrived before a receive was posted
    arrived: VecDeque<WorkRequest>,
}

struct Side {
    send_cq: Arc<LoopbackCq>,
    recv_cq: Arc<LoopbackCq>,
    inbox: SpinLock<Inbox>,
}

impl Side {
    fn new(name: &str) -> Self {
        Self {
            send_cq: LoopbackCq::new(format!("{}-send", name)),
            recv_cq: LoopbackCq::new(format!("{}-recv", name)),
            inbox: SpinLock::new(Inbox::default()),
        }
    }

    /// Pair queued messages with posted receives
    fn match_recvs(&self) {
        let mut inbox = self.inbox.lock();
        while !inbox.recvs.is_empty() && !inbox.arrived.is_empty() {
            let (Some(recv), Some(msg)) = (inbox.recvs.pop_front(), inbox.arrived.pop_front()) else {
                break;
            };
            let opcode = match msg.opcode {
                Opcode::RdmaWriteWithImm => Opcode::RecvRdmaWithImm,
                _ => Opcode::Recv,
            };
            let mut event = CompletionEvent::new(recv.token, opcode, msg.length.min(recv.length));
            if let Some(imm) = msg.imm_data {
                event = event.with_imm(imm);
            }
            if msg.length > recv.length {
                event = event.with_status(WcStatus::LOC_LEN_ERR);
            }
            self.recv_cq.push(event);
        }
    }
}

struct Link {
    sides: [Side; 2],
    down: AtomicBool,
}

/// One endpoint of an in-memory connection.
#[derive(Clone)]
pub struct LoopbackTransport {
    link: Arc<Link>,
    side: usize,
}

impl LoopbackTransport {
    /// Two connected endpoints
    pub fn pair() -> (Self, Self) {
        let link = Arc::new(Link {
            sides: [Side::new("a"), Side::new("b")],
            down: AtomicBool::new(false),
        });
        (
            Self {
                link: Arc::clone(&link),
                side: 0,
            },
            Self { link, side: 1 },
        )
    }

    fn local(&self) -> &Side {
        &self.link.sides[self.side]
    }

    fn remote(&self) -> &Side {
        &self.link.sides[1 - self.side]
    }

    pub fn send_cq(&self) -> Arc<LoopbackCq> {
        Arc::clone(&self.local().send_cq)
    }

    pub fn recv_cq(&self) -> Arc<LoopbackCq> {
        Arc::clone(&self.local().recv_cq)
    }

    /// Tear the connection down: posts fail and every queue on both sides
    /// reports `Disconnected`.
    pub fn disconnect(&self) {
        self.link.down.store(true, Ordering::Release);
        for side in &self.link.sides {
            side.send_cq.fail_with(TransportError::Disconnected);
            side.recv_cq.fail_with(TransportError::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.link.down.load(Ordering::Acquire)
    }

    fn complete_local(&self, req: &WorkRequest) {
        if req.signaled {
            self.local()
                .send_cq
                .push(CompletionEvent::new(req.token, req.opcode, req.length));
        }
    }
}

impl Transport for LoopbackTransport {
    fn post(&self, req: WorkRequest) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        cqd_trace!("loopback {}: post {} {} bytes token {}", self.side, req.opcode, req.length, req.token);

        match req.opcode {
            Opcode::Recv => {
                self.local().inbox.lock().recvs.push_back(req);
                self.local().match_recvs();
            }
            Opcode::Send | Opcode::RdmaWriteWithImm => {
                self.complete_local(&req);
                self.remote().inbox.lock().arrived.push_back(req);
                self.remote().match_recvs();
            }
            Opcode::RdmaWrite | Opcode::RdmaRead => self.complete_local(&req),
            Opcode::RecvRdmaWithImm => {
                return Err(TransportError::InvalidRequest("completion-only opcode"));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("side", &self.side)
            .field("connected", &self.is_connected())
            .finish()
    }
}
