//! Simple logging module.
//!
//! Diagnostics go to stderr through a process-wide level filter. The filter
//! defaults to [`Level::Info`]; setting the `DEBUG` environment variable to
//! any non-empty value lowers it to [`Level::Debug`], which also switches
//! on the per-instruction execution trace in the interpreter.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Sets the filter level explicitly.
pub fn init(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Initialises the filter from the environment: `DEBUG` set to a non-empty
/// value selects [`Level::Debug`].
pub fn init_from_env() {
    match std::env::var("DEBUG") {
        Ok(value) if !value.is_empty() => init(Level::Debug),
        _ => init(Level::Info),
    }
}

/// Returns true if the given level should be logged.
#[inline]
fn enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Returns true when debug-level output (the execution trace) is on.
#[inline]
pub fn debug_enabled() -> bool {
    enabled(Level::Debug)
}

fn log(level: Level, message: &str) {
    if enabled(level) {
        eprintln!("[{level:5}] {message}");
    }
}

/// Logs a debug-level message.
pub fn debug(message: &str) {
    log(Level::Debug, message);
}

/// Logs an info-level message.
pub fn info(message: &str) {
    log(Level::Info, message);
}

/// Logs a warning-level message.
pub fn warn(message: &str) {
    log(Level::Warn, message);
}

/// Logs an error-level message.
pub fn error(message: &str) {
    log(Level::Error, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_display() {
        assert_eq!(format!("{}", Level::Debug), "DEBUG");
        assert_eq!(format!("{}", Level::Info), "INFO");
        assert_eq!(format!("{}", Level::Warn), "WARN");
        assert_eq!(format!("{}", Level::Error), "ERROR");
    }
}
