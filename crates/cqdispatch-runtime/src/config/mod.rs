//! Runtime configuration
//!
//! Provides compiled-in defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`new`)
//!
//! # Example
//!
//! ```rust,ignore
//! use cqdispatch_runtime::config::{ExecutorConfig, PollerConfig};
//!
//! let recv = PollerConfig::from_env()
//!     .name("recv-poller")
//!     .executor(ExecutorConfig::from_env().num_workers(8));
//!
//! let send = PollerConfig::send().name("send-poller");
//! ```

pub mod defaults;

use std::time::Duration;

use cqdispatch_core::constants::MAX_WORKERS;
use cqdispatch_core::{env_get, env_get_opt, DispatchError};

use crate::affinity::parse_cpulist;
use crate::backoff::BackoffPolicy;
use crate::dispatch::{Direction, DrainPolicy};
use crate::poller::ConnectSignal;

fn idle_default() -> BackoffPolicy {
    BackoffPolicy::new(
        defaults::IDLE_SPINS,
        defaults::IDLE_YIELDS,
        Duration::from_micros(defaults::IDLE_SLEEP_US),
    )
}

fn drain_from_env() -> DrainPolicy {
    std::env::var("CQD_SEND_DRAIN_OPCODES")
        .map(|list| DrainPolicy::parse(&list))
        .unwrap_or_default()
}

// ============================================================================
// ExecutorConfig
// ============================================================================

/// Executor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Hand-off queue capacity
    pub queue_capacity: usize,
    /// How idle workers wait
    pub idle: BackoffPolicy,
    /// Worker thread name prefix; workers are `<prefix>-<n>`
    pub thread_name: String,
    /// CPUs to pin workers to, round-robin; empty leaves them unpinned
    pub cpus: Vec<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ExecutorConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CQD_EXECUTOR_WORKERS` - Number of worker threads
    /// - `CQD_EXECUTOR_QUEUE_CAPACITY` - Hand-off queue capacity
    /// - `CQD_EXECUTOR_CPUS` - cpulist to pin workers to, e.g. `2-5,8`
    /// - `CQD_IDLE_SPINS` / `CQD_IDLE_YIELDS` / `CQD_IDLE_SLEEP_US` - Idle backoff
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("CQD_EXECUTOR_WORKERS", defaults::NUM_WORKERS),
            queue_capacity: env_get("CQD_EXECUTOR_QUEUE_CAPACITY", defaults::EXECUTOR_QUEUE_CAPACITY),
            idle: idle_default().with_env(),
            thread_name: defaults::WORKER_THREAD_NAME.to_string(),
            cpus: std::env::var("CQD_EXECUTOR_CPUS")
                .map(|list| parse_cpulist(&list))
                .unwrap_or_default(),
        }
    }

    /// Explicit defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            queue_capacity: defaults::EXECUTOR_QUEUE_CAPACITY,
            idle: idle_default(),
            thread_name: defaults::WORKER_THREAD_NAME.to_string(),
            cpus: Vec::new(),
        }
    }

    // Builder methods

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn queue_capacity(mut self, cap: usize) -> Self {
        self.queue_capacity = cap;
        self
    }

    pub fn idle(mut self, policy: BackoffPolicy) -> Self {
        self.idle = policy;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub fn cpus(mut self, cpus: Vec<usize>) -> Self {
        self.cpus = cpus;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers must be <= 256"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("queue_capacity must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// PollerConfig
// ============================================================================

/// Poller configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Polling thread name
    pub name: String,
    /// Receive pollers dispatch everything; send pollers apply `drain`
    pub direction: Direction,
    /// Completions requested per poll call
    pub batch_size: usize,
    /// How the polling thread waits when a pass found nothing
    pub idle: BackoffPolicy,
    /// Send-side events discarded without dispatch
    pub drain: DrainPolicy,
    /// Pin the polling thread to this CPU
    pub cpu: Option<usize>,
    /// Shared connection-established flag; a fresh one per poller when unset
    pub connect_signal: Option<ConnectSignal>,
    /// Executor built by `Poller::new`
    pub executor: ExecutorConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PollerConfig {
    /// Receive-side defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CQD_POLL_BATCH_SIZE` - Completions per poll call
    /// - `CQD_POLLER_CPU` - CPU to pin the polling thread to
    /// - `CQD_SEND_DRAIN_OPCODES` - Comma-separated opcodes drained on send pollers
    /// - `CQD_IDLE_SPINS` / `CQD_IDLE_YIELDS` / `CQD_IDLE_SLEEP_US` - Idle backoff
    /// - executor variables, see [`ExecutorConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            name: defaults::POLLER_THREAD_NAME.to_string(),
            direction: Direction::Recv,
            batch_size: env_get("CQD_POLL_BATCH_SIZE", defaults::POLL_BATCH_SIZE),
            idle: BackoffPolicy::busy_poll().with_env(),
            drain: drain_from_env(),
            cpu: env_get_opt("CQD_POLLER_CPU"),
            connect_signal: None,
            executor: ExecutorConfig::from_env(),
        }
    }

    /// Receive-side explicit defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            name: defaults::POLLER_THREAD_NAME.to_string(),
            direction: Direction::Recv,
            batch_size: defaults::POLL_BATCH_SIZE,
            idle: BackoffPolicy::busy_poll(),
            drain: DrainPolicy::new(),
            cpu: None,
            connect_signal: None,
            executor: ExecutorConfig::new(),
        }
    }

    /// Send-side defaults: drain policy applies, idle backs off to 1 ms sleeps.
    pub fn send() -> Self {
        Self {
            direction: Direction::Send,
            idle: BackoffPolicy::relaxed(),
            ..Self::new()
        }
    }

    // Builder methods

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn idle(mut self, policy: BackoffPolicy) -> Self {
        self.idle = policy;
        self
    }

    pub fn drain(mut self, policy: DrainPolicy) -> Self {
        self.drain = policy;
        self
    }

    pub fn cpu(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn connect_signal(mut self, signal: ConnectSignal) -> Self {
        self.connect_signal = Some(signal);
        self
    }

    pub fn executor(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    /// Validate configuration and return errors if invalid.
    ///
    /// The executor section is checked only by `Poller::new`, which is the
    /// one constructor that uses it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size must be > 0"));
        }
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("name must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// HybridConfig
// ============================================================================

/// Hybrid poll-executor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Polling thread name
    pub name: String,
    /// Completions requested per poll call
    pub batch_size: usize,
    /// Submission queue capacity
    pub queue_capacity: usize,
    /// How the thread waits when a pass found nothing
    pub idle: BackoffPolicy,
    /// Send-side events discarded without dispatch
    pub drain: DrainPolicy,
    /// Pin the thread to this CPU
    pub cpu: Option<usize>,
    /// Shared connection-established flag; a fresh one when unset
    pub connect_signal: Option<ConnectSignal>,
    /// Whether submitted tokens are resumed from the start
    pub listening: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HybridConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CQD_HYBRID_QUEUE_CAPACITY` - Submission queue capacity
    /// - `CQD_POLL_BATCH_SIZE` - Completions per poll call
    /// - `CQD_POLLER_CPU` - CPU to pin the thread to
    /// - `CQD_SEND_DRAIN_OPCODES` - Comma-separated opcodes drained on send queues
    /// - `CQD_IDLE_SPINS` / `CQD_IDLE_YIELDS` / `CQD_IDLE_SLEEP_US` - Idle backoff
    pub fn from_env() -> Self {
        Self {
            name: defaults::HYBRID_THREAD_NAME.to_string(),
            batch_size: env_get("CQD_POLL_BATCH_SIZE", defaults::POLL_BATCH_SIZE),
            queue_capacity: env_get("CQD_HYBRID_QUEUE_CAPACITY", defaults::HYBRID_QUEUE_CAPACITY),
            idle: BackoffPolicy::busy_poll().with_env(),
            drain: drain_from_env(),
            cpu: env_get_opt("CQD_POLLER_CPU"),
            connect_signal: None,
            listening: false,
        }
    }

    /// Explicit defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            name: defaults::HYBRID_THREAD_NAME.to_string(),
            batch_size: defaults::POLL_BATCH_SIZE,
            queue_capacity: defaults::HYBRID_QUEUE_CAPACITY,
            idle: BackoffPolicy::busy_poll(),
            drain: DrainPolicy::new(),
            cpu: None,
            connect_signal: None,
            listening: false,
        }
    }

    // Builder methods

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn queue_capacity(mut self, cap: usize) -> Self {
        self.queue_capacity = cap;
        self
    }

    pub fn idle(mut self, policy: BackoffPolicy) -> Self {
        self.idle = policy;
        self
    }

    pub fn drain(mut self, policy: DrainPolicy) -> Self {
        self.drain = policy;
        self
    }

    pub fn cpu(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn connect_signal(mut self, signal: ConnectSignal) -> Self {
        self.connect_signal = Some(signal);
        self
    }

    pub fn listening(mut self, enabled: bool) -> Self {
        self.listening = enabled;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("queue_capacity must be > 0"));
        }
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("name must not be empty"));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for DispatchError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => DispatchError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqdispatch_core::Opcode;

    #[test]
    fn test_new_is_valid() {
        assert!(ExecutorConfig::new().validate().is_ok());
        assert!(PollerConfig::new().validate().is_ok());
        assert!(PollerConfig::send().validate().is_ok());
        assert!(HybridConfig::new().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ExecutorConfig::new()
            .num_workers(2)
            .queue_capacity(8)
            .thread_name("exec");
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.thread_name, "exec");

        let poller = PollerConfig::new()
            .name("p0")
            .batch_size(32)
            .cpu(1)
            .drain(DrainPolicy::new().with_opcode(Opcode::RdmaWrite));
        assert_eq!(poller.name, "p0");
        assert_eq!(poller.batch_size, 32);
        assert_eq!(poller.cpu, Some(1));
        assert_eq!(poller.drain.opcodes(), &[Opcode::RdmaWrite]);
    }

    #[test]
    fn test_send_preset() {
        let config = PollerConfig::send();
        assert_eq!(config.direction, Direction::Send);
        assert_eq!(config.idle, BackoffPolicy::relaxed());
    }

    #[test]
    fn test_validation() {
        assert!(ExecutorConfig::new().num_workers(0).validate().is_err());
        assert!(ExecutorConfig::new().num_workers(1000).validate().is_err());
        assert!(ExecutorConfig::new().queue_capacity(0).validate().is_err());
        assert!(PollerConfig::new().batch_size(0).validate().is_err());
        assert!(HybridConfig::new().queue_capacity(0).validate().is_err());
    }

    #[test]
    fn test_error_maps_to_dispatch_error() {
        let err = ExecutorConfig::new().num_workers(0).validate().unwrap_err();
        assert_eq!(
            DispatchError::from(err),
            DispatchError::InvalidConfig("num_workers must be > 0")
        );
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("CQD_HYBRID_QUEUE_CAPACITY", "128");
        let config = HybridConfig::from_env();
        std::env::remove_var("CQD_HYBRID_QUEUE_CAPACITY");
        assert_eq!(config.queue_capacity, 128);
    }
}
