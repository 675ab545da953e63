//! Unified error types for the snowflake-mux codebase.

use std::fmt;
use std::io;

/// Error type for service startup.
#[derive(Debug)]
pub enum ServeError {
    /// The listening socket could not be acquired
    Bind { addr: String, source: io::Error },
    /// I/O failure on an already bound socket
    Io(io::Error),
    /// The compiled gRPC descriptor set could not be loaded for reflection
    Reflection(tonic_reflection::server::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            ServeError::Io(e) => write!(f, "I/O error: {}", e),
            ServeError::Reflection(e) => write!(f, "grpc reflection: {}", e),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Bind { source, .. } => Some(source),
            ServeError::Io(e) => Some(e),
            ServeError::Reflection(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServeError {
    fn from(e: io::Error) -> Self {
        ServeError::Io(e)
    }
}

impl From<tonic_reflection::server::Error> for ServeError {
    fn from(e: tonic_reflection::server::Error) -> Self {
        ServeError::Reflection(e)
    }
}

/// Error type for identifier generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Node number does not fit the node field of the identifier
    InvalidNode(i64),
    /// Wall clock reads earlier than the configured epoch
    ClockBeforeEpoch,
    /// Timestamp no longer fits the 41-bit time field
    TimeOverflow,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::InvalidNode(n) => write!(f, "node number {} out of range", n),
            IdError::ClockBeforeEpoch => write!(f, "clock is earlier than the id epoch"),
            IdError::TimeOverflow => write!(f, "timestamp overflows the id time field"),
        }
    }
}

impl std::error::Error for IdError {}

/// Error type for text-protocol request parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Nothing before the first line terminator
    Empty,
    /// Header line does not carry an integer element count
    BadCount,
    /// No command line at the expected position
    MissingCommand,
}

impl fmt::Display for TextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextError::Empty => write!(f, "empty request"),
            TextError::BadCount => write!(f, "element count is not an integer"),
            TextError::MissingCommand => write!(f, "request carries no command"),
        }
    }
}

impl std::error::Error for TextError {}
