//! Per-connection identity and lifecycle bookkeeping.

use std::fmt;
use std::io;
use uuid::Uuid;

/// Unique identifier for an SSE connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Lifecycle of one streaming connection.
///
/// `Starting` moves to `Streaming` once the response target passed the
/// flush capability check, or straight to `Closed` when it did not.
/// `Draining` covers teardown after the copy loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Checking the response target and writing headers
    Starting,
    /// Handler, scheduler and copy loop are running
    Streaming,
    /// Copy loop stopped; cancelling the handler and stopping the scheduler
    Draining,
    /// Nothing left running for this connection
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Starting => write!(f, "starting"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Draining => write!(f, "draining"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection left the `Streaming` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The handler returned and every byte it produced was written.
    HandlerFinished,
    /// Writing or flushing to the client failed; the client went away.
    ClientDisconnected(io::ErrorKind),
    /// The request context was cancelled from outside (e.g. server shutdown).
    Cancelled,
}

impl CloseReason {
    /// Whether the client side ended the stream.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CloseReason::ClientDisconnected(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::HandlerFinished => write!(f, "handler finished"),
            CloseReason::ClientDisconnected(kind) => write!(f, "client disconnected ({kind})"),
            CloseReason::Cancelled => write!(f, "cancelled"),
        }
    }
}
