//! Server service: binds the listener and runs sessions until Ctrl-C.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tern_core::{Server, ServerHandler};

use crate::chat::ChatRoom;
use crate::config::{Mode, ServerConfig};
use crate::echo::EchoHandler;

/// The running tern server.
pub struct TernService {
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl TernService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the listener when cancelled. Sessions already
    /// running finish on their own.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handler(&self) -> Arc<dyn ServerHandler> {
        match self.config.server.mode {
            Mode::Echo => Arc::new(EchoHandler),
            Mode::Chat => Arc::new(ChatRoom::new(self.config.chat.history_limit)),
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let core = self.config.to_core_config();
        core.session.validate()?;
        let listener = TcpListener::bind(self.config.listen_addr()?).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let server = Server::new(self.handler(), self.config.to_core_config());
        info!(mode = %self.config.server.mode, "tern server ready");
        server.serve(listener, self.shutdown.clone()).await?;
        Ok(())
    }
}
