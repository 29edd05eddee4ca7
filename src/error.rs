//! Unified error types for the field controller.
//!
//! Every fallible operation in the core funnels into a single [`Error`]
//! enum so the event handlers can classify failures uniformly: log and
//! drop, skip the rule, or abort a send.  Failures stay local to the
//! event being processed.

use core::fmt;

use crate::app::ports::BusError;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A payload could not be decoded (bad query string, non-numeric value).
    MalformedMessage(String),
    /// An expected field is absent (sensor type, rule value field).
    UnknownField(String),
    /// A command template references a symbol with no configured id.
    /// Fatal for the send attempt: retrying would fail the same way.
    UnresolvedSymbol { field: String, value: String },
    /// A condition uses an operator outside the comparator set.
    InvalidOperator(String),
    /// Configuration is invalid or could not be loaded.
    Config(String),
    /// A background task could not be started.
    Init(String),
    /// The bus refused a publish or subscribe.
    Bus(BusError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::UnknownField(field) => write!(f, "unknown field: {field}"),
            Self::UnresolvedSymbol { field, value } => {
                write!(f, "unresolved symbol: {field}={value}")
            }
            Self::InvalidOperator(op) => write!(f, "invalid operator: {op:?}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
