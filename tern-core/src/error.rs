//! Domain-specific error types for the tern session engine.
//!
//! Three layers, three enums:
//! - [`TransportError`]: completion status of a connection operation.
//! - [`EnvelopeError`]: why an envelope unit failed to parse or serialize.
//! - [`TernError`]: the crate-level error returned by endpoints and handles.

use std::time::Duration;
use thiserror::Error;

// ── TransportError ───────────────────────────────────────────────

/// Outcome of a failed transport operation, as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The operation was cancelled because the connection was forced closed.
    ///
    /// Always swallowed by the session.
    #[error("operation aborted")]
    Aborted,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Any other transport failure (reset, I/O, protocol violation).
    #[error("transport failure: {0}")]
    Failure(String),
}

impl TransportError {
    /// Whether the session should stop silently instead of reporting.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Aborted | Self::Closed)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Failure(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        use tokio_tungstenite::tungstenite::error::ProtocolError;

        match e {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                TransportError::Closed
            }
            other => TransportError::Failure(other.to_string()),
        }
    }
}

// ── EnvelopeError ────────────────────────────────────────────────

/// Why an envelope unit was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The `inv` / `message` literal or the colon after it is missing.
    #[error("bad prefix: {0}")]
    BadPrefix(&'static str),

    /// A length field, delimiter, or payload is malformed.
    #[error("bad message: {0}")]
    BadMessage(&'static str),

    /// A structurally valid unit carries a forbidden value.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

// ── TernError ────────────────────────────────────────────────────

/// The canonical error type for endpoints, handles and configuration.
#[derive(Debug, Error)]
pub enum TernError {
    /// A transport operation failed outside of a running session.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An envelope could not be encoded or decoded.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A session lifecycle transition was attempted from the wrong phase.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The session behind a handle has already been torn down.
    #[error("session closed")]
    SessionClosed,

    /// A session or listener task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TernError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TernError::WebSocket(Box::new(e))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TernError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TernError::SessionClosed
    }
}
