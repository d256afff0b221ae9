//! # cqdispatch-core
//!
//! Core types and traits for the completion-dispatch runtime.
//!
//! This crate is platform-agnostic and has no external dependencies. The
//! threads, queues and pollers live in `cqdispatch-runtime`.
//!
//! ## Modules
//!
//! - `token` - Operation token (arena index + generation)
//! - `event` - Completion event, opcode and status
//! - `transport` - Transport / CompletionQueue traits and work requests
//! - `error` - Error types
//! - `spinlock` - Spin lock for short per-operation critical sections
//! - `klog` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod token;
pub mod event;
pub mod transport;
pub mod error;
pub mod spinlock;
pub mod klog;
pub mod env;

// Re-exports for convenience
pub use token::OpToken;
pub use event::{CompletionEvent, Opcode, WcStatus};
pub use transport::{CompletionQueue, Transport, WorkRequest};
pub use error::{DispatchError, DispatchResult, PushError, TransportError};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_micros, env_get_opt};

/// Default sizing
pub mod constants {
    /// Executor worker threads
    pub const DEFAULT_WORKERS: usize = 4;

    /// Completions requested per `CompletionQueue::poll`
    pub const DEFAULT_POLL_BATCH: usize = 16;

    /// Executor / hybrid submission queue capacity
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

    /// In-flight operations per arena
    pub const DEFAULT_ARENA_SLOTS: usize = 65536;

    /// Upper bound on executor workers
    pub const MAX_WORKERS: usize = 256;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
