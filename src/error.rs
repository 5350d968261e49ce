//! Crate-wide error taxonomy.
//!
//! Internal code propagates failures via `anyhow::Result` with `.context(...)`,
//! matching the teacher's dominant idiom. `EngineError` exists only at the
//! boundaries named in spec §7, where callers need to distinguish failure
//! kinds (a malformed KISS frame vs. a rejected config value) rather than
//! just read a message.

use std::fmt;

/// The six logical error kinds from spec §7, mapped onto a single enum.
#[derive(Debug)]
pub enum EngineError {
    /// KISS unescape failure, truncated AX.25 frame, or bad address field.
    Frame(String),
    /// APRS payload didn't fit its declared dialect.
    Parse(String),
    /// Decoded lat/lon outside valid ranges, or exactly (0, 0).
    Coord(String),
    /// Transport read/write failure.
    Io(std::io::Error),
    /// Snapshot directory unwritable, or compression failure.
    Persistence(String),
    /// Invalid numeric range or unknown key in a config set.
    Config(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Frame(msg) => write!(f, "frame error: {msg}"),
            EngineError::Parse(msg) => write!(f, "parse error: {msg}"),
            EngineError::Coord(msg) => write!(f, "coordinate error: {msg}"),
            EngineError::Io(err) => write!(f, "io error: {err}"),
            EngineError::Persistence(msg) => write!(f, "persistence error: {msg}"),
            EngineError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}
