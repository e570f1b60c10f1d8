//! redrpc Error Types
//!
//! Error handling for calls, dispatch and broker access.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for redrpc operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// No response arrived before the deadline.
    ///
    /// The outcome of the call is unknown: the request may never have been
    /// picked up, may still be running, or its result may have expired unread.
    #[error("RPC timed out after {0:?}")]
    Timeout(Duration),

    /// The remote handler failed
    #[error(transparent)]
    Remote(#[from] RemoteException),

    /// Envelope could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Broker operation failed
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Call arguments do not form a keyword mapping
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Options failed validation
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Signal handler registration failed
    #[error("Signal registration failed: {0}")]
    Signal(io::Error),

    /// A worker thread panicked outside of handler execution
    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// Result type alias for redrpc operations
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// Create an invalid options error with a message
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    /// Create an invalid arguments error with a message
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Check if this is a client-side timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error carries a remote handler failure
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Check if retrying the same operation may succeed.
    ///
    /// Timeouts are reported as recoverable, but a retried call executes the
    /// handler again unless the first attempt was never picked up.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Broker(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Failure reported by a remote handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote exception: {message}")]
pub struct RemoteException {
    /// The handler's error message
    pub message: String,
    /// Remote trace, when the handler recorded one
    pub trace: Option<String>,
}

impl RemoteException {
    pub fn new(message: impl Into<String>, trace: Option<String>) -> Self {
        Self {
            message: message.into(),
            trace,
        }
    }
}

/// Envelope encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

impl CodecError {
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Errors raised by a broker adapter
#[derive(Error, Debug)]
pub enum BrokerError {
    /// IO error talking to the broker
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The broker rejected or failed a command
    #[error("{0}")]
    Backend(String),

    /// The broker has been shut down
    #[error("Broker closed")]
    Closed,
}

impl BrokerError {
    /// Create a backend error from any displayable failure
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::Backend(_) | Self::Closed => false,
        }
    }
}
