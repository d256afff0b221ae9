//! Completion events.
//!
//! A `CompletionEvent` is the transport's record of one finished operation.
//! The dispatch layer never looks inside the payload it describes; it only
//! uses the token to find who is waiting and the opcode to decide whether
//! anybody is.

use core::fmt;

use crate::error::TransportError;
use crate::token::OpToken;

/// Kind of operation a completion reports.
///
/// Mirrors the verbs work-completion opcodes the runtime cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Send,
    RdmaWrite,
    RdmaWriteWithImm,
    RdmaRead,
    /// Receive completion for a plain send from the peer.
    Recv,
    /// Receive completion consumed by an RDMA write-with-immediate.
    RecvRdmaWithImm,
}

impl Opcode {
    /// True for completions generated on the receive side.
    #[inline]
    pub const fn is_recv(self) -> bool {
        matches!(self, Opcode::Recv | Opcode::RecvRdmaWithImm)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Send => "send",
            Opcode::RdmaWrite => "rdma-write",
            Opcode::RdmaWriteWithImm => "rdma-write-imm",
            Opcode::RdmaRead => "rdma-read",
            Opcode::Recv => "recv",
            Opcode::RecvRdmaWithImm => "recv-rdma-imm",
        }
    }

    /// Inverse of [`name`](Self::name), case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [Opcode; 6] = [
            Opcode::Send,
            Opcode::RdmaWrite,
            Opcode::RdmaWriteWithImm,
            Opcode::RdmaRead,
            Opcode::Recv,
            Opcode::RecvRdmaWithImm,
        ];
        let s = s.trim();
        ALL.into_iter().find(|op| op.name().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work-completion status code as reported by the transport.
///
/// Zero is success; every other value is a transport-specific failure code
/// (for verbs: `ibv_wc_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct WcStatus(pub u32);

impl WcStatus {
    pub const SUCCESS: WcStatus = WcStatus(0);
    /// Local length error
    pub const LOC_LEN_ERR: WcStatus = WcStatus(1);
    /// Work request flushed because the queue pair entered the error state
    pub const WR_FLUSH_ERR: WcStatus = WcStatus(5);
    /// Remote access error
    pub const REM_ACCESS_ERR: WcStatus = WcStatus(10);
    /// Transport retry counter exceeded
    pub const RETRY_EXC_ERR: WcStatus = WcStatus(12);

    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            WcStatus::SUCCESS => write!(f, "success"),
            WcStatus::LOC_LEN_ERR => write!(f, "local length error"),
            WcStatus::WR_FLUSH_ERR => write!(f, "work request flushed"),
            WcStatus::REM_ACCESS_ERR => write!(f, "remote access error"),
            WcStatus::RETRY_EXC_ERR => write!(f, "retry counter exceeded"),
            WcStatus(code) => write!(f, "status {}", code),
        }
    }
}

/// Immutable snapshot of one finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Identifies the operation context waiting for this event.
    pub token: OpToken,
    pub opcode: Opcode,
    pub status: WcStatus,
    /// Bytes transferred.
    pub byte_len: u32,
    /// Immediate data, when the operation carried one.
    pub imm_data: Option<u32>,
}

impl CompletionEvent {
    /// Successful completion with no immediate data.
    pub const fn new(token: OpToken, opcode: Opcode, byte_len: u32) -> Self {
        Self {
            token,
            opcode,
            status: WcStatus::SUCCESS,
            byte_len,
            imm_data: None,
        }
    }

    pub fn with_imm(mut self, imm: u32) -> Self {
        self.imm_data = Some(imm);
        self
    }

    pub fn with_status(mut self, status: WcStatus) -> Self {
        self.status = status;
        self
    }

    /// Placeholder used to size poll buffers; never dispatched.
    pub const fn empty() -> Self {
        Self::new(OpToken::NONE, Opcode::Send, 0)
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Fail with `TransportError::Completion` unless the status is success.
    pub fn ensure_success(&self) -> Result<&Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Completion {
                token: self.token,
                status: self.status,
            })
        }
    }

    /// Receive-side result: bytes received and the immediate, if any.
    #[inline]
    pub fn recv_result(&self) -> (u32, Option<u32>) {
        (self.byte_len, self.imm_data)
    }
}
