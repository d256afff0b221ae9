//! CPU pinning for polling and worker threads.
//!
//! A busy-polling thread that migrates between cores loses its warm cache
//! lines on every move, so pollers (and optionally workers) can be pinned.
//! Only Linux supports pinning; elsewhere `pin_current_thread` returns
//! `Unsupported` and callers log and carry on unpinned.

use std::io;

use cqdispatch_core::cqd_warn;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        /// Highest CPU id a `CpuSet` can hold, plus one
        fn cpu_limit() -> usize {
            CpuSet::count()
        }

        /// Pin the calling thread to `cpu`.
        pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
            let mut set = CpuSet::new();
            set.set(cpu).map_err(io::Error::from)?;
            // Pid 0 is the calling thread
            sched_setaffinity(Pid::from_raw(0), &set).map_err(io::Error::from)
        }
    } else {
        /// Same bound as Linux `CPU_SETSIZE`
        fn cpu_limit() -> usize {
            1024
        }

        /// Pin the calling thread to `cpu`. Not supported on this platform.
        pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "thread pinning is only supported on Linux",
            ))
        }
    }
}

/// Parse a cpulist string like "0-3,8,10-11" into sorted, deduplicated ids.
///
/// Malformed parts, inverted ranges and ids the platform cannot pin to are
/// skipped with a warning; ranges are clipped to that limit.
pub fn parse_cpulist(s: &str) -> Vec<usize> {
    let limit = cpu_limit();
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            match (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
                (Ok(start), Ok(end)) if start > end => {
                    cqd_warn!("cpulist: ignoring inverted range '{}'", part);
                }
                (Ok(start), Ok(_)) if start >= limit => {
                    cqd_warn!("cpulist: ignoring '{}', cpu ids stop at {}", part, limit - 1);
                }
                (Ok(start), Ok(end)) => {
                    if end >= limit {
                        cqd_warn!("cpulist: clipping '{}' to {}-{}", part, start, limit - 1);
                    }
                    cpus.extend(start..=end.min(limit - 1));
                }
                _ => cqd_warn!("cpulist: ignoring malformed '{}'", part),
            }
        } else {
            match part.parse::<usize>() {
                Ok(c) if c < limit => cpus.push(c),
                Ok(_) => cqd_warn!("cpulist: ignoring '{}', cpu ids stop at {}", part, limit - 1),
                Err(_) => cqd_warn!("cpulist: ignoring malformed '{}'", part),
            }
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    cpus
}
