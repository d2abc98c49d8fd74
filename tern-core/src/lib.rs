//! # tern-core
//!
//! Per-connection WebSocket session engine.
//!
//! This crate contains:
//! - **Session**: one turn-taking state machine for both the server
//!   (accepting) and client (connecting) roles, with hook dispatch
//! - **Watchdog**: idle timeout that probes a silent peer, then force-closes it
//! - **Driver**: the tokio task that owns a session and serialises its events
//! - **Transport**: the completion-based `Connection` seam and its
//!   `tokio-tungstenite` implementation
//! - **Envelope**: the `inv:`/`message:` codec used to batch chat messages
//! - **Endpoints**: `Server` (stream → session factory) and `Client` (TCP connect)
//! - **Error**: `TernError`, `TransportError`, `EnvelopeError`

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, ClientSession};
pub use config::{ClientConfig, FrameMode, ServerConfig, SessionConfig};
pub use envelope::{Envelopes, Inv, Message, ParseError, Parsed};
pub use error::{EnvelopeError, TernError, TransportError};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{
    ClientHandler, NoopHandler, RoleKind, ServerHandler, Session, SessionCommand, SessionDriver,
    SessionHandle, SessionId, SessionPhase,
};
pub use transport::{AcceptParams, CloseReason, Completion, Connection, FrameKind};
