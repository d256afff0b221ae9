//! Idle backoff for polling and worker loops
//!
//! A loop that found no work escalates through three stages:
//! spin, then yield, then sleep. Any work found resets it to spinning.

use std::time::Duration;

use cqdispatch_core::{env_get, env_get_micros};

/// How an idle loop waits before its next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Idle rounds spent in `spin_loop`
    pub spins: u32,
    /// Idle rounds spent in `yield_now` after spinning
    pub yields: u32,
    /// Sleep per round once spins and yields are used up.
    /// Zero keeps yielding forever.
    pub sleep: Duration,
}

impl BackoffPolicy {
    /// Never leave the CPU. Lowest latency; used on receive paths.
    pub const fn busy_poll() -> Self {
        Self {
            spins: u32::MAX,
            yields: 0,
            sleep: Duration::ZERO,
        }
    }

    /// Back off to a 1 ms sleep. For traffic where latency matters less
    /// than CPU, such as send-completion draining.
    pub const fn relaxed() -> Self {
        Self {
            spins: 64,
            yields: 16,
            sleep: Duration::from_millis(1),
        }
    }

    pub const fn new(spins: u32, yields: u32, sleep: Duration) -> Self {
        Self { spins, yields, sleep }
    }

    /// Start from `self`, overriding from `CQD_IDLE_SPINS`,
    /// `CQD_IDLE_YIELDS` and `CQD_IDLE_SLEEP_US`.
    pub fn with_env(self) -> Self {
        Self {
            spins: env_get("CQD_IDLE_SPINS", self.spins),
            yields: env_get("CQD_IDLE_YIELDS", self.yields),
            sleep: env_get_micros("CQD_IDLE_SLEEP_US", self.sleep),
        }
    }

    /// Fresh per-loop backoff state
    #[inline]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            step: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            spins: 64,
            yields: 32,
            sleep: Duration::from_micros(100),
        }
    }
}

/// Per-loop idle state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    step: u32,
}

impl Backoff {
    /// Wait once, escalating with each consecutive idle round.
    #[inline]
    pub fn snooze(&mut self) {
        let spins = self.policy.spins;
        let yields = spins.saturating_add(self.policy.yields);

        if self.step < spins {
            // Short exponential spin, capped at 64 pause instructions
            for _ in 0..(1u32 << self.step.min(6)) {
                std::hint::spin_loop();
            }
        } else if self.step < yields || self.policy.sleep.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.policy.sleep);
        }
        self.step = self.step.saturating_add(1);
    }

    /// Work was found
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// True once further snoozes sleep
    pub fn is_sleeping(&self) -> bool {
        !self.policy.sleep.is_zero()
            && self.step >= self.policy.spins.saturating_add(self.policy.yields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_busy_poll_never_sleeps() {
        let mut b = BackoffPolicy::busy_poll().backoff();
        for _ in 0..10_000 {
            b.snooze();
        }
        assert!(!b.is_sleeping());
    }

    #[test]
    fn test_escalates_to_sleep_and_resets() {
        let mut b = BackoffPolicy::new(2, 2, Duration::from_millis(2)).backoff();
        for _ in 0..4 {
            assert!(!b.is_sleeping());
            b.snooze();
        }
        assert!(b.is_sleeping());

        let start = Instant::now();
        b.snooze();
        assert!(start.elapsed() >= Duration::from_millis(2));

        b.reset();
        assert!(!b.is_sleeping());
    }

    #[test]
    fn test_relaxed_sleeps_one_millisecond() {
        let p = BackoffPolicy::relaxed();
        assert_eq!(p.sleep, Duration::from_millis(1));
        assert!(p.spins > 0);
    }
}
