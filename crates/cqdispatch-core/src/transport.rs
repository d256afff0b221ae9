//! Transport abstraction.
//!
//! The dispatch runtime needs exactly two things from the RDMA layer: a way
//! to post work and a way to poll finished work. Queue-pair setup, memory
//! registration and the connection handshake all live on the other side of
//! these traits.
//!
//! # Implementors
//!
//! - A verbs backend: `post` wraps `ibv_post_send`/`ibv_post_recv` with the
//!   token in `wr_id`; `poll` wraps `ibv_poll_cq`.
//! - `LoopbackTransport` (cqdispatch-runtime): in-memory pair of endpoints
//!   for tests and demos.

use crate::error::TransportError;
use crate::event::{CompletionEvent, Opcode};
use crate::token::OpToken;

/// One work request handed to the transport.
///
/// Only the fields the dispatch layer needs are modelled; scatter/gather
/// lists and remote keys belong to the transport's own request builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRequest {
    /// Token the completion must carry back. Filled in by the arena on post.
    pub token: OpToken,
    pub opcode: Opcode,
    /// Bytes to send, or receive buffer size.
    pub length: u32,
    /// Immediate data for write-with-immediate.
    pub imm_data: Option<u32>,
    /// Whether the transport generates a completion for this request.
    /// Unsignaled requests never resume anybody.
    pub signaled: bool,
}

impl WorkRequest {
    pub const fn send(length: u32) -> Self {
        Self {
            token: OpToken::NONE,
            opcode: Opcode::Send,
            length,
            imm_data: None,
            signaled: true,
        }
    }

    pub const fn recv(length: u32) -> Self {
        Self {
            token: OpToken::NONE,
            opcode: Opcode::Recv,
            length,
            imm_data: None,
            signaled: true,
        }
    }

    pub const fn write_with_imm(length: u32, imm: u32) -> Self {
        Self {
            token: OpToken::NONE,
            opcode: Opcode::RdmaWriteWithImm,
            length,
            imm_data: Some(imm),
            signaled: true,
        }
    }

    pub const fn read(length: u32) -> Self {
        Self {
            token: OpToken::NONE,
            opcode: Opcode::RdmaRead,
            length,
            imm_data: None,
            signaled: true,
        }
    }

    /// Post without requesting a completion.
    pub fn unsignaled(mut self) -> Self {
        self.signaled = false;
        self
    }

    pub fn with_token(mut self, token: OpToken) -> Self {
        self.token = token;
        self
    }

    #[inline]
    pub fn is_recv(&self) -> bool {
        self.opcode.is_recv()
    }
}

/// Posts work requests.
///
/// **Contract:**
/// - `post()` must never block on completion; it only enqueues.
/// - The token in `req` has already been registered with an operation
///   context; the completion for this request must carry it unchanged.
pub trait Transport: Send + Sync {
    fn post(&self, req: WorkRequest) -> Result<(), TransportError>;
}

/// Source of completion events.
///
/// **Contract:**
/// - `poll()` must NEVER block. If nothing finished, it returns `Ok(0)`.
/// - At most `out.len()` events are written, in completion order for this
///   queue.
/// - An `Err` means the queue is unusable; the caller stops polling it.
pub trait CompletionQueue: Send + Sync {
    fn poll(&self, out: &mut [CompletionEvent]) -> Result<usize, TransportError>;

    /// Human-readable identity for logs.
    fn name(&self) -> &str {
        "cq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let wr = WorkRequest::write_with_imm(128, 9).with_token(OpToken::new(4, 1));
        assert_eq!(wr.opcode, Opcode::RdmaWriteWithImm);
        assert_eq!(wr.imm_data, Some(9));
        assert_eq!(wr.token, OpToken::new(4, 1));
        assert!(wr.signaled);

        let wr = WorkRequest::send(16).unsignaled();
        assert!(!wr.signaled);
        assert!(WorkRequest::recv(16).is_recv());
    }
}
