//! The connection a session drives.
//!
//! A [`Connection`] is completion based: every operation returns at once
//! and its outcome arrives later as a [`Completion`] on the session's event
//! channel. Inbound ping/pong/close frames are reported the same way, as
//! [`Completion::Control`], independently of the read/write cycle.
//!
//! [`ws`] implements it on top of `tokio-tungstenite`; the `test-util`
//! feature adds a recording mock.

pub mod ws;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use bytes::Bytes;

use crate::error::TransportError;

pub use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Response received by a client at the end of the upgrade handshake.
pub type UpgradeResponse = tokio_tungstenite::tungstenite::handshake::client::Response;

// ── Frames ───────────────────────────────────────────────────────

/// Data frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    #[default]
    Text,
    Binary,
}

/// One inbound data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Bytes,
}

/// Control frame types reported out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Ping,
    Pong,
    Close,
}

/// An inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub kind: ControlKind,
    /// Ping/pong application data, or the close reason text.
    pub payload: Bytes,
}

/// Close code and reason sent with a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// RFC 6455 code 1000.
    pub fn normal() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
        }
    }

    /// RFC 6455 code 1001.
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self {
            code: 1001,
            reason: reason.into(),
        }
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::normal()
    }
}

// ── Handshake parameters ─────────────────────────────────────────

/// How a server session accepts the upgrade request on its stream.
#[derive(Debug, Clone, Default)]
pub struct AcceptParams {
    /// Reject upgrades whose request path differs.
    pub path: Option<String>,
    /// Require the client to offer this subprotocol; it is echoed back.
    pub protocol: Option<String>,
    /// Extra headers added to the 101 response.
    pub response_headers: Vec<(String, String)>,
}

impl AcceptParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.push((name.into(), value.into()));
        self
    }
}

/// What a client session sends in its upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    /// Value of the `Host` header, e.g. `127.0.0.1:8080`.
    pub host: String,
    /// Request target, e.g. `/ws`.
    pub target: String,
    /// Extra request headers (subprotocol, auth...).
    pub request_headers: Vec<(String, String)>,
}

// ── Connection ───────────────────────────────────────────────────

/// Outcome of an operation issued on a [`Connection`], or an inbound
/// control frame.
#[derive(Debug)]
pub enum Completion {
    Accepted(Result<(), TransportError>),
    Handshaked(Result<UpgradeResponse, TransportError>),
    Read(Result<Frame, TransportError>),
    /// Carries the number of payload bytes written.
    Written(Result<usize, TransportError>),
    Pinged(Result<(), TransportError>),
    Ponged(Result<(), TransportError>),
    Closed(Result<(), TransportError>),
    Control(ControlFrame),
}

/// Non-blocking transport primitive held by a session.
///
/// Each method only *issues* the operation; exactly one matching
/// [`Completion`] is delivered later. `force_close` makes every
/// outstanding and future operation complete with
/// [`TransportError::Aborted`].
pub trait Connection: Send {
    fn accept(&mut self, params: AcceptParams);
    fn handshake(&mut self, params: HandshakeParams);
    fn read(&mut self);
    fn write(&mut self, data: Bytes, kind: FrameKind);
    fn ping(&mut self, payload: Bytes);
    fn pong(&mut self, payload: Bytes);
    fn close(&mut self, reason: CloseReason);
    fn force_close(&mut self);
}
