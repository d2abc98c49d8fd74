//! Configuration for the tern server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_core::transport::FrameKind;
use tern_core::{AcceptParams, FrameMode, ServerConfig as CoreServerConfig, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and upgrade policy.
    pub network: NetworkConfig,
    /// Per-session timing and framing.
    pub session: SessionSection,
    /// What the server does with its sessions.
    pub server: ModeConfig,
    /// Chat room settings (chat mode only).
    pub chat: ChatConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind, e.g. `127.0.0.1:8080`.
    pub listen_address: String,
    /// Only accept upgrades on this path. Empty accepts any path.
    pub path: String,
    /// Require this subprotocol. Empty means none, except in chat mode
    /// where `chat` is required.
    pub protocol: String,
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Idle window before a silent peer is probed.
    pub idle_timeout_secs: u64,
    /// How long the peer has to answer the probe.
    pub probe_timeout_secs: u64,
    /// Outgoing frame type: "auto", "text" or "binary".
    pub frame: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Write every message back to its sender.
    #[default]
    Echo,
    /// Multi-user chat room speaking the envelope protocol.
    Chat,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Echo => write!(f, "echo"),
            Mode::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages kept for newcomers. 0 keeps everything.
    pub history_limit: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".into(),
            path: "/ws".into(),
            protocol: String::new(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 10,
            probe_timeout_secs: 10,
            frame: "auto".into(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.network.listen_address.parse()
    }

    /// Session settings for the core engine. Zero windows fall back to
    /// the defaults.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let secs = |value: u64, fallback: Duration| {
            if value == 0 {
                fallback
            } else {
                Duration::from_secs(value)
            }
        };
        let frame_mode = match self.session.frame.to_ascii_lowercase().as_str() {
            "text" => FrameMode::Fixed(FrameKind::Text),
            "binary" => FrameMode::Fixed(FrameKind::Binary),
            "auto" => FrameMode::Auto,
            other => {
                tracing::warn!("unknown frame type {other:?}; using auto");
                FrameMode::Auto
            }
        };
        SessionConfig {
            idle_timeout: secs(self.session.idle_timeout_secs, defaults.idle_timeout),
            probe_timeout: secs(self.session.probe_timeout_secs, defaults.probe_timeout),
            frame_mode,
        }
    }

    /// Upgrade policy for the configured mode.
    pub fn accept_params(&self) -> AcceptParams {
        let mut params =
            AcceptParams::new().header("Server", concat!("tern/", env!("CARGO_PKG_VERSION")));
        if !self.network.path.is_empty() {
            params = params.path(self.network.path.clone());
        }
        match (self.network.protocol.as_str(), self.server.mode) {
            ("", Mode::Chat) => params.protocol("chat"),
            ("", Mode::Echo) => params,
            (protocol, _) => params.protocol(protocol),
        }
    }

    pub fn to_core_config(&self) -> CoreServerConfig {
        CoreServerConfig {
            session: self.session_config(),
            accept: self.accept_params(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
