//! # cqdispatch - completion dispatch runtime
//!
//! Turns transport completions into resumed operations.
//!
//! An operation is registered in an [`OperationArena`] and gets an
//! [`OpToken`]. The token rides along with the work request; when the
//! transport reports the completion, a polling thread looks the token up,
//! stores the event, and resumes the operation either on the polling
//! thread itself or on an [`Executor`] worker.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cqdispatch::prelude::*;
//! use std::sync::Arc;
//!
//! let (a, b) = LoopbackTransport::pair();
//! let arena = Arc::new(OperationArena::new(1024)?);
//!
//! // One poller per side, resuming on a worker pool once connected
//! let poller = Poller::new(vec![b.recv_cq()], arena.clone(), PollerConfig::new())?;
//! poller.connect_done();
//!
//! let recv = arena.post(&b, WorkRequest::recv(64))?;
//! a.post(WorkRequest::send(16).unsignaled())?;
//! let event = recv.wait();
//! assert_eq!(event.byte_len, 16);
//! ```
//!
//! ## Threads
//!
//! ```text
//!   cqd-poller ─┬─ Connecting: resume inline
//!               └─ Running:    deliver ─► BoundedQueue ─► cqd-worker-N ─► resume
//!
//!   cqd-hybrid ─── poll recv, poll send, resume queued tokens (one thread)
//! ```
//!
//! ## Environment
//!
//! Every `*Config::from_env()` reads `CQD_*` variables; see
//! [`ExecutorConfig`], [`PollerConfig`] and [`HybridConfig`]. Logging is
//! controlled by `CQD_LOG_LEVEL`.

// Re-export core types
pub use cqdispatch_core::{
    CompletionEvent,
    CompletionQueue,
    DispatchError,
    DispatchResult,
    Opcode,
    OpToken,
    PushError,
    Transport,
    TransportError,
    WcStatus,
    WorkRequest,
};

// Re-export logging macros
pub use cqdispatch_core::{cqd_debug, cqd_error, cqd_info, cqd_trace, cqd_warn};
pub use cqdispatch_core::klog::{init as init_logging, set_flush, set_level, Level as LogLevel};

// Re-export env utilities
pub use cqdispatch_core::{env_get, env_get_bool, env_get_micros, env_get_opt};
pub use cqdispatch_core::constants;

// Re-export runtime types
pub use cqdispatch_runtime::{
    BackoffPolicy,
    BoundedQueue,
    ConfigError,
    ConnectSignal,
    Continuation,
    Direction,
    DispatchMode,
    Dispatcher,
    DrainPolicy,
    Executor,
    ExecutorConfig,
    ExecutorStats,
    HybridConfig,
    HybridPollExecutor,
    LoopbackCq,
    LoopbackTransport,
    OperationArena,
    PendingOp,
    PollStats,
    Poller,
    PollerConfig,
    PollerState,
    Resumed,
};
pub use cqdispatch_runtime::affinity::pin_current_thread;

/// Everything needed to wire a transport to pollers
pub mod prelude {
    pub use crate::{
        CompletionEvent, CompletionQueue, ConnectSignal, DispatchError, DispatchResult,
        Dispatcher, DrainPolicy, Executor, ExecutorConfig, HybridConfig, HybridPollExecutor,
        LoopbackTransport, Opcode, OpToken, OperationArena, PendingOp, Poller, PollerConfig,
        PollerState, Transport, WorkRequest,
    };
}
