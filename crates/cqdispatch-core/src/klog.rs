//! Kernel-style leveled logging to stderr.
//!
//! Polling and worker threads are long-lived and named (`cqd-poller-0`,
//! `cqd-worker-2`, ...), so every line is tagged with the emitting thread.
//! Lines are written under the stderr lock so concurrent threads never
//! interleave within a line.
//!
//! # Environment Variables
//!
//! - `CQD_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace, or 0..5 (default: warn)
//! - `CQD_LOG_FLUSH=1` - flush stderr after every line (useful when chasing a crash)
//!
//! # Usage
//!
//! ```ignore
//! use cqdispatch_core::{cqd_info, cqd_warn};
//!
//! cqd_info!("poller {} running with {} queues", name, n);
//! cqd_warn!("dropping stale completion {}", token);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Off,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Parse a level name or digit; `None` for anything unrecognised
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(Level::Off),
            "error" | "1" => Some(Level::Error),
            "warn" | "2" => Some(Level::Warn),
            "info" | "3" => Some(Level::Info),
            "debug" | "4" => Some(Level::Debug),
            "trace" | "5" => Some(Level::Trace),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Level::Off => "",
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);
static INIT: Once = Once::new();

/// Read `CQD_LOG_LEVEL` / `CQD_LOG_FLUSH`. Runs once; later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = std::env::var("CQD_LOG_LEVEL").ok().and_then(|v| Level::parse(&v)) {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        FLUSH.store(crate::env::env_get_bool("CQD_LOG_FLUSH", false), Ordering::Relaxed);
    });
}

#[inline]
pub fn level() -> Level {
    init();
    Level::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level programmatically (wins over the environment)
pub fn set_level(level: Level) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: Level) -> bool {
    level != Level::Off && level <= self::level()
}

#[doc(hidden)]
pub fn _log(level: Level, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let current = std::thread::current();
    let thread = current.name().unwrap_or("-");

    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "[{}] [{}] {}", level.tag(), thread, args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[macro_export]
macro_rules! cqd_error {
    ($($arg:tt)*) => {
        $crate::klog::_log($crate::klog::Level::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! cqd_warn {
    ($($arg:tt)*) => {
        $crate::klog::_log($crate::klog::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! cqd_info {
    ($($arg:tt)*) => {
        $crate::klog::_log($crate::klog::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! cqd_debug {
    ($($arg:tt)*) => {
        $crate::klog::_log($crate::klog::Level::Debug, format_args!($($arg)*))
    };
}

/// Per-event tracing; compiled in, filtered at runtime
#[macro_export]
macro_rules! cqd_trace {
    ($($arg:tt)*) => {
        $crate::klog::_log($crate::klog::Level::Trace, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Info < Level::Trace);
        assert_eq!(Level::from_u8(42), Level::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("2"), Some(Level::Warn));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_macros_compile() {
        set_level(Level::Off);
        assert!(!enabled(Level::Error));
        cqd_error!("error {}", 1);
        cqd_warn!("warn");
        cqd_info!("info {:?}", "x");
        cqd_debug!("debug");
        cqd_trace!("trace");
    }
}
