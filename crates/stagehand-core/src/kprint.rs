//! Leveled stderr logging for the runtime threads
//!
//! Lines look like `[WARN ] stagehand-clock stagehand_runtime::clock: message`
//! and are written under the stderr lock so concurrent workers never
//! interleave partial lines.
//!
//! # Environment Variables
//!
//! - `STAGEHAND_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5).
//!   Default: warn
//! - `STAGEHAND_FLUSH_EPRINT=1` - flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use stagehand_core::{kdebug, kerror};
//!
//! kdebug!("sweep thread started, tick_nanos={}", tick_nanos);
//! kerror!("timer failed: {}", err);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

use crate::env::{env_get_bool, env_get_str};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown strings yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static INIT: Once = Once::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Read the logging environment once. Later `set_*` calls win.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = LogLevel::parse(&env_get_str("STAGEHAND_LOG_LEVEL", "")) {
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
        FLUSH.store(env_get_bool("STAGEHAND_FLUSH_EPRINT", false), Ordering::Relaxed);
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, module: &str, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(handle, "{} {} {}: {}", level.label(), name, module, args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            module_path!(),
            format_args!($($arg)*),
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            module_path!(),
            format_args!($($arg)*),
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            module_path!(),
            format_args!($($arg)*),
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            module_path!(),
            format_args!($($arg)*),
        );
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            module_path!(),
            format_args!($($arg)*),
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Trace);
    }

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" 1 "), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_off_is_never_enabled() {
        assert!(!level_enabled(LogLevel::Off));
    }

    #[test]
    fn test_macros_compile() {
        kerror!("error {}", 1);
        kwarn!("warn");
        kinfo!("info {:?}", "x");
        kdebug!("debug");
        ktrace!("trace");
    }
}
