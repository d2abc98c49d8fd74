//! Runtime settings for sessions and endpoints.
//!
//! These are plain structs; the binaries map their TOML files onto them.

use std::time::Duration;

use crate::error::TernError;
use crate::transport::{AcceptParams, FrameKind};

/// Default idle window before the watchdog probes the peer.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window the peer has to answer the probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Type of outgoing data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Mirror the type of the last frame received.
    #[default]
    Auto,
    /// Always send this type.
    Fixed(FrameKind),
}

// ── SessionConfig ────────────────────────────────────────────────

/// Per-session settings shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle window; also bounds the upgrade handshake.
    pub idle_timeout: Duration,
    /// Second stage of the default watchdog escalation.
    pub probe_timeout: Duration,
    /// Initial outgoing frame type.
    pub frame_mode: FrameMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            frame_mode: FrameMode::Auto,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), TernError> {
        if self.idle_timeout.is_zero() {
            return Err(TernError::InvalidConfig("idle timeout must be positive".into()));
        }
        if self.probe_timeout.is_zero() {
            return Err(TernError::InvalidConfig("probe timeout must be positive".into()));
        }
        Ok(())
    }
}

// ── ServerConfig ─────────────────────────────────────────────────

/// Settings for a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub session: SessionConfig,
    /// Accept policy used by [`Server::accept`](crate::server::Server::accept).
    pub accept: AcceptParams,
}

// ── ClientConfig ─────────────────────────────────────────────────

/// Settings for [`Client::connect`](crate::client::Client::connect).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` to dial; also sent as the `Host` header.
    pub server_address: String,
    /// Request target used by the default `on_connect`.
    pub target: String,
    /// Extra upgrade request headers.
    pub request_headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    /// Run the idle watchdog on the client too. Off by default: clients
    /// are user driven and are not reaped by this layer.
    pub keepalive: bool,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".to_string(),
            target: "/".to_string(),
            request_headers: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            keepalive: false,
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Self::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Offer a subprotocol in the upgrade request.
    pub fn protocol(self, protocol: impl Into<String>) -> Self {
        self.header("Sec-WebSocket-Protocol", protocol)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.push((name.into(), value.into()));
        self
    }

    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_ten_second_windows() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.frame_mode, FrameMode::Auto);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_windows_are_rejected() {
        let cfg = SessionConfig {
            idle_timeout: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TernError::InvalidConfig(_))));
    }

    #[test]
    fn client_builder() {
        let cfg = ClientConfig::new("localhost:9000")
            .target("/ws")
            .protocol("chat")
            .keepalive(true);
        assert_eq!(cfg.server_address, "localhost:9000");
        assert_eq!(cfg.target, "/ws");
        assert_eq!(
            cfg.request_headers,
            vec![("Sec-WebSocket-Protocol".to_string(), "chat".to_string())]
        );
        assert!(cfg.keepalive);
    }
}
