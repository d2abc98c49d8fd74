//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_core::ClientConfig as CoreClientConfig;

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// What the client does once connected.
    pub client: ModeConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address (host:port).
    pub server_address: String,
    /// Upgrade request target. Empty picks `/echo` or `/ws` by mode.
    pub path: String,
    /// Subprotocol to offer. Empty offers none, except in chat mode
    /// where `chat` is offered.
    pub protocol: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Probe the server when it goes quiet.
    pub keepalive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Send one greeting, print the reply, close.
    #[default]
    Echo,
    /// Interactive chat room session on the console.
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub mode: Mode,
    /// Chat nickname. Asked on the console when empty.
    pub nickname: String,
    /// Text sent in echo mode.
    pub greeting: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".into(),
            path: String::new(),
            protocol: String::new(),
            connect_timeout_ms: 5000,
            keepalive: false,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Echo,
            nickname: String::new(),
            greeting: "hello!".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

// ── Load ─────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn target(&self) -> &str {
        match (self.network.path.as_str(), self.client.mode) {
            ("", Mode::Echo) => "/echo",
            ("", Mode::Chat) => "/ws",
            (path, _) => path,
        }
    }

    /// Connection settings for the core engine.
    pub fn to_core_config(&self) -> CoreClientConfig {
        let mut core = CoreClientConfig::new(self.network.server_address.clone())
            .target(self.target())
            .keepalive(self.network.keepalive);
        if self.network.connect_timeout_ms > 0 {
            core.connect_timeout = Duration::from_millis(self.network.connect_timeout_ms);
        }
        match (self.network.protocol.as_str(), self.client.mode) {
            ("", Mode::Chat) => core.protocol("chat"),
            ("", Mode::Echo) => core,
            (protocol, _) => core.protocol(protocol),
        }
    }
}
