//! A small structured-logging facility in the teacher's own style
//! (`crate::log::LogLevel` plus a `log!(level, fmt, args...)` macro),
//! rather than pulling in the external `log` crate. The runtime, DPOR
//! explorer, and runner log scheduling decisions, races found, and
//! bound rejections through this.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    LogError = 0,
    LogWarn = 1,
    LogInfo = 2,
    LogDebug = 3,
}

impl LogLevel {
    fn from_env_str(s: &str) -> Option<LogLevel> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::LogError),
            "warn" | "warning" => Some(LogLevel::LogWarn),
            "info" => Some(LogLevel::LogInfo),
            "debug" => Some(LogLevel::LogDebug),
            _ => None,
        }
    }
}

static CURRENT_LEVEL: AtomicUsize = AtomicUsize::new(LogLevel::LogWarn as usize);

/// Reads `RD_SCT_LOG` from the environment (once) and sets the
/// process-wide log level, mirroring the teacher's `Flags` environment
/// overrides. Settings::global() calls this during initialisation;
/// tests may call it directly to raise verbosity.
pub fn init_from_env() {
    if let Ok(val) = std::env::var("RD_SCT_LOG") {
        if let Some(level) = LogLevel::from_env_str(&val) {
            set_level(level);
        }
    }
}

pub fn set_level(level: LogLevel) {
    CURRENT_LEVEL.store(level as usize, Ordering::Relaxed);
}

pub fn level() -> LogLevel {
    match CURRENT_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::LogError,
        1 => LogLevel::LogWarn,
        2 => LogLevel::LogInfo,
        _ => LogLevel::LogDebug,
    }
}

pub fn enabled(level: LogLevel) -> bool {
    level <= self::level()
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            eprintln!("[{:?}] {}", $level, format!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_gates_verbosity() {
        set_level(LogLevel::LogWarn);
        assert!(enabled(LogLevel::LogError));
        assert!(enabled(LogLevel::LogWarn));
        assert!(!enabled(LogLevel::LogInfo));
        assert!(!enabled(LogLevel::LogDebug));
        set_level(LogLevel::LogDebug);
        assert!(enabled(LogLevel::LogDebug));
    }
}
