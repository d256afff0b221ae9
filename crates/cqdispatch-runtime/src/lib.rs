//! # cqdispatch-runtime
//!
//! Threads and queues that turn transport completions into resumed
//! operations.
//!
//! This crate provides:
//! - `BoundedQueue`: lock-free MPMC hand-off queue with close
//! - `OperationArena`: generation-checked table of in-flight operations
//! - `Executor`: worker pool resuming operations from a queue
//! - `Poller`: two-phase (connecting / running) completion polling thread
//! - `HybridPollExecutor`: single thread that polls and resumes
//! - `LoopbackTransport`: in-memory transport for tests and demos
//!
//! ```text
//!   Transport ──post──►  NIC / loopback  ──completion──► CompletionQueue
//!       ▲                                                    │ poll
//!       │ token                                              ▼
//!   OperationArena ◄──deliver── Poller ──dispatch──► Executor workers
//!       │                                                    │
//!       └──────────────────── resume(token) ◄────────────────┘
//! ```

pub mod affinity;
pub mod arena;
pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod hybrid;
pub mod loopback;
pub mod poller;
pub mod queue;

// Re-exports
pub use arena::{Continuation, OperationArena, PendingOp, Resumed};
pub use backoff::{Backoff, BackoffPolicy};
pub use config::{ConfigError, ExecutorConfig, HybridConfig, PollerConfig};
pub use dispatch::{Direction, DispatchMode, Dispatcher, DrainPolicy, PollStats};
pub use executor::{Executor, ExecutorStats};
pub use hybrid::HybridPollExecutor;
pub use loopback::{LoopbackCq, LoopbackTransport};
pub use poller::{ConnectSignal, Poller, PollerState};
pub use queue::BoundedQueue;
