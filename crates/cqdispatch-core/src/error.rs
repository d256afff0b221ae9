//! Error types for completion dispatch

use core::fmt;

use crate::event::WcStatus;
use crate::token::OpToken;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised by the transport collaborator.
///
/// Any error returned from `CompletionQueue::poll` is fatal for the poller
/// that observed it; the runtime never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the peer is gone
    Disconnected,

    /// Polling the completion queue failed (errno-style code)
    Poll(i32),

    /// Posting a work request failed (errno-style code)
    Post(i32),

    /// Work request rejected before reaching the hardware
    InvalidRequest(&'static str),

    /// Operation completed with a non-success status
    Completion { token: OpToken, status: WcStatus },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected => write!(f, "transport disconnected"),
            TransportError::Poll(e) => write!(f, "completion queue poll failed: errno {}", e),
            TransportError::Post(e) => write!(f, "work request post failed: errno {}", e),
            TransportError::InvalidRequest(why) => write!(f, "invalid work request: {}", why),
            TransportError::Completion { token, status } => {
                write!(f, "operation {} completed with {}", token, status)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors that can occur while registering, routing or resuming operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Queue was closed; expected during shutdown
    QueueClosed,

    /// Queue is full but open; caller should retry or back off
    CapacityExceeded,

    /// Transport failure (fatal for the owning poller)
    Transport(TransportError),

    /// Bounded structure requested with capacity 0
    InvalidCapacity,

    /// Configuration rejected by validation
    InvalidConfig(&'static str),

    /// Token does not name a live operation (stale, duplicate or foreign)
    StaleToken(OpToken),

    /// Operation arena is full
    NoSlotsAvailable,

    /// Slot is not in the state the operation requires
    InvalidState,

    /// Caller-side wait gave up
    Timeout,

    /// Failed to spawn a polling or worker thread
    Spawn,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::QueueClosed => write!(f, "queue closed"),
            DispatchError::CapacityExceeded => write!(f, "queue capacity exceeded"),
            DispatchError::Transport(e) => write!(f, "transport failure: {}", e),
            DispatchError::InvalidCapacity => write!(f, "capacity must be at least 1"),
            DispatchError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            DispatchError::StaleToken(t) => write!(f, "stale operation token {}", t),
            DispatchError::NoSlotsAvailable => write!(f, "no operation slots available"),
            DispatchError::InvalidState => write!(f, "invalid operation state"),
            DispatchError::Timeout => write!(f, "operation timed out"),
            DispatchError::Spawn => write!(f, "failed to spawn thread"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        DispatchError::Transport(e)
    }
}

/// Error returned by a failed non-blocking push; hands the value back.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue is open but full
    Full(T),
    /// Queue was closed
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the value that could not be pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PushError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "Full(..)"),
            PushError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "queue full"),
            PushError::Closed(_) => write!(f, "queue closed"),
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

impl<T> From<PushError<T>> for DispatchError {
    fn from(e: PushError<T>) -> Self {
        match e {
            PushError::Full(_) => DispatchError::CapacityExceeded,
            PushError::Closed(_) => DispatchError::QueueClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = DispatchError::QueueClosed;
        assert_eq!(format!("{}", e), "queue closed");

        let e = DispatchError::Transport(TransportError::Poll(5));
        assert_eq!(
            format!("{}", e),
            "transport failure: completion queue poll failed: errno 5"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: DispatchError = TransportError::Disconnected.into();
        assert!(matches!(err, DispatchError::Transport(TransportError::Disconnected)));

        let err: DispatchError = PushError::Full(3u64).into();
        assert_eq!(err, DispatchError::CapacityExceeded);

        let err: DispatchError = PushError::Closed(3u64).into();
        assert_eq!(err, DispatchError::QueueClosed);
    }

    #[test]
    fn test_push_error_returns_value() {
        let e = PushError::Full(String::from("token"));
        assert!(e.is_full());
        assert_eq!(e.into_inner(), "token");
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;
        let err = DispatchError::Transport(TransportError::Post(11));
        assert!(err.source().is_some());
        assert!(DispatchError::Timeout.source().is_none());
    }
}
