//! Error types for event streaming

use std::io;
use thiserror::Error;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while configuring or driving an event stream
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration values that load but cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The response target cannot push bytes to the client incrementally
    #[error("Response target does not support incremental flushing")]
    FlushUnsupported,

    /// Writing the `event:` line of an event failed
    #[error("Error writing event name: {0}")]
    EventName(#[source] io::Error),

    /// Writing the data lines or the terminator of an event failed
    #[error("Relay write failed: {0}")]
    Relay(#[source] io::Error),

    /// The connection context was cancelled while the operation was pending
    #[error("Stream cancelled")]
    Cancelled,

    /// The session no longer accepts events
    #[error("Session closed")]
    Closed,

    /// Serializing an event payload failed
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means the client side of the stream is gone.
    ///
    /// Handlers use this to tell "stop producing" apart from failures of
    /// their own payload sources.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Cancelled | Error::Closed => true,
            Error::EventName(e) | Error::Relay(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
