use std::{fmt, sync::OnceLock};

macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::log($level, format_args!($($arg)*))
    };
}

macro_rules! trace {
    ($($arg:tt)*) => {
        log!($crate::log::LogLevel::Trace, $($arg)*)
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        log!($crate::log::LogLevel::Debug, $($arg)*)
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        log!($crate::log::LogLevel::Info, $($arg)*)
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        log!($crate::log::LogLevel::Warn, $($arg)*)
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        log!($crate::log::LogLevel::Error, $($arg)*)
    };
}

static MAX_LEVEL: OnceLock<LogLevel> = OnceLock::new();

/// Sets the most verbose level that is printed. Only the first call has an
/// effect.
pub fn init(level: LogLevel) {
    let _ = MAX_LEVEL.set(level);
}

pub fn enabled(level: LogLevel) -> bool {
    level >= MAX_LEVEL.get().copied().unwrap_or(LogLevel::Info)
}

pub fn log(level: LogLevel, message: fmt::Arguments) {
    if enabled(level) {
        eprintln!("{} {}", LevelFormat(level), message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

struct LevelFormat(LogLevel);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            LogLevel::Trace => 35,
            LogLevel::Debug => 34,
            LogLevel::Info => 32,
            LogLevel::Warn => 33,
            LogLevel::Error => 31,
        };
        let msg = match self.0 {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => " INFO",
            LogLevel::Warn => " WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "\x1B[{color};1m{msg}\x1B[0m")
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_expand_to_expressions() {
        let logged = |id: usize| match id {
            0 => trace!("id {id}"),
            1 => debug!("id {id}"),
            _ => error!("id {id}"),
        };
        for id in 0..3 {
            logged(id);
        }
        assert!(enabled(LogLevel::Error));
        assert!(!enabled(LogLevel::Trace));
    }
}
